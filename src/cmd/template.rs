//! Template commands: `procflow template` and `procflow templates`.

use super::output;
use anyhow::{Context, Result};
use console::style;
use procflow::command::CommandClient;
use std::collections::HashMap;

/// Parse `key=value` arguments; the value may itself contain `=`.
pub fn parse_params(raw: &[String]) -> Result<HashMap<String, String>> {
    raw.iter()
        .map(|param| {
            let (key, value) = param
                .split_once('=')
                .with_context(|| format!("Invalid parameter '{}': expected key=value", param))?;
            let key = key.trim();
            if key.is_empty() {
                anyhow::bail!("Invalid parameter '{}': empty key", param);
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

pub async fn cmd_template(
    client: &CommandClient,
    name: &str,
    params: &[String],
    dry_run: bool,
) -> Result<i32> {
    let params = parse_params(params)?;

    if dry_run {
        let (command, _) = client.expand_template(name, &params)?;
        println!("{}", command);
        return Ok(0);
    }

    let builder = client.from_template(name, &params)?;
    tracing::debug!(template = name, command = builder.command(), "Running template");
    Ok(output::report(builder.run().await, false))
}

pub fn cmd_templates(client: &CommandClient) -> Result<i32> {
    for name in client.template_names() {
        let Some(template) = client.template(&name) else {
            continue;
        };
        println!("{}", style(&name).bold());
        println!("  {}", template.command);
        if let Some(description) = &template.description {
            println!("  {}", style(description).dim());
        }
        if !template.defaults.is_empty() {
            let mut defaults: Vec<_> = template.defaults.iter().collect();
            defaults.sort();
            let rendered: Vec<String> = defaults
                .into_iter()
                .map(|(k, v)| format!("{}={:?}", k, v))
                .collect();
            println!("  defaults: {}", rendered.join(" "));
        }
    }
    Ok(0)
}
