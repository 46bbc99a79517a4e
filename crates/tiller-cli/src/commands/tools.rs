use std::time::Duration;
use tiller_tools::ToolRegistry;

/// List the registry, or show one tool. `default_timeout` is the configured
/// per-call deadline.
pub fn run(tools: &ToolRegistry, name: Option<&str>, default_timeout: Duration) -> anyhow::Result<()> {
    match name {
        Some(name) => print_tool_detail(tools, name, default_timeout)?,
        None => print_tool_list(tools),
    }

    Ok(())
}

fn print_tool_list(tools: &ToolRegistry) {
    let mut names = tools.names();
    names.sort();

    println!("Loaded tools ({}):", names.len());
    for name in names {
        let description = tools
            .get(&name)
            .map(|tool| first_line(tool.description()).to_string())
            .unwrap_or_else(|| "unknown tool".to_string());
        println!(
            "{name} [{}] - {description}",
            scheduling(tools.is_concurrency_safe(&name))
        );
    }
}

fn print_tool_detail(
    tools: &ToolRegistry,
    name: &str,
    default_timeout: Duration,
) -> anyhow::Result<()> {
    let tool = tools
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("Unknown tool: {name}"))?;
    let schema = serde_json::to_string_pretty(&tool.parameters_schema())?;

    println!("name: {}", tool.name());
    println!("label: {}", tool.label());
    println!("scheduling: {}", scheduling(tool.is_concurrency_safe()));
    match tool.call_timeout(default_timeout) {
        Some(timeout) => println!("timeout: {}s", timeout.as_secs()),
        None => println!("timeout: none"),
    }
    println!("description: {}", tool.description());
    println!("parameters:");
    println!("{schema}");

    Ok(())
}

/// Whether the dispatcher may run the tool alongside others in one turn.
fn scheduling(concurrency_safe: bool) -> &'static str {
    if concurrency_safe {
        "parallel"
    } else {
        "serial"
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
