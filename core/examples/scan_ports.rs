//! Example: Scan and display all active ports with their owners.

use procport_core::{Config, Context, ScanOptions};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    println!("Scanning ports...\n");

    let context = match Context::new(Config::default()) {
        Ok(context) => context,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            return;
        }
    };
    let scanner = context.port_scanner();

    match scanner.get_active_ports(&ScanOptions::default()).await {
        Ok(ports) => {
            if ports.is_empty() {
                println!("No active ports found.");
                return;
            }

            println!(
                "{:<12} {:<12} {:<8} {:<20} {}",
                "PORT", "STATE", "PID", "PROCESS", "COMMAND"
            );
            println!("{}", "-".repeat(100));

            for record in &ports {
                let (pid, name, command) = match &record.process {
                    Some(p) => (p.pid.to_string(), p.name.clone(), p.command.clone()),
                    None => ("-".to_string(), "-".to_string(), String::new()),
                };

                println!(
                    "{:<12} {:<12} {:<8} {:<20} {}",
                    record.display_port(),
                    record.state,
                    pid,
                    name.chars().take(20).collect::<String>(),
                    command.chars().take(40).collect::<String>()
                );
            }

            println!("\nTotal: {} ports", ports.len());
        }
        Err(e) => {
            eprintln!("Error scanning ports: {}", e);
            for hint in e.suggestions() {
                eprintln!("  hint: {}", hint);
            }
        }
    }
}
