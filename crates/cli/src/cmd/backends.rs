//! List watch backends

use anyhow::Result;
use owo_colors::OwoColorize;
use watcher::platform::{default_backend, Capabilities};
use watcher::BackendKind;

fn describe(caps: Capabilities) -> String {
    let mut parts = Vec::new();
    if caps.supports_moves {
        parts.push("moves");
    }
    if caps.supports_attribute_events {
        parts.push("attributes");
    }
    if caps.requires_polling {
        parts.push("polling");
    }
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(", ")
    }
}

pub fn run() -> Result<()> {
    let selected = default_backend();

    println!("{}", "Backends".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for kind in BackendKind::ALL {
        let status = if kind.is_supported() {
            "supported".green().to_string()
        } else {
            "unsupported".red().to_string()
        };
        let marker = if kind == selected {
            format!(" {}", "(selected)".cyan())
        } else {
            String::new()
        };

        println!(
            "{:<8} priority {:>3}  {:<11}  {}{}",
            kind.name(),
            kind.priority(),
            status,
            describe(kind.capabilities()).dimmed(),
            marker
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_capabilities() {
        let caps = Capabilities {
            supports_moves: true,
            supports_attribute_events: false,
            requires_polling: true,
        };
        assert_eq!(describe(caps), "moves, polling");

        let none = Capabilities {
            supports_moves: false,
            supports_attribute_events: false,
            requires_polling: false,
        };
        assert_eq!(describe(none), "-");
    }
}
