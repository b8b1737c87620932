//! Interactive testing for procport-core.
//!
//! Usage:
//!   cargo run --example interactive ps [name]               # List processes
//!   cargo run --example interactive tree <pid>              # Show a process tree
//!   cargo run --example interactive kill [-f] <pid>         # Kill process
//!   cargo run --example interactive free <start> <end>      # Find a free port
//!   cargo run --example interactive suggest <port>          # Suggest alternatives
//!   cargo run --example interactive resolve <port> <cmd..>  # Free a port, run cmd
//!   cargo run --example interactive metrics                 # Host metrics
//!   cargo run --example interactive config                  # Show config

use std::env;
use std::process::ExitCode;

use procport_core::{
    domain::parse_port, Config, ConfigStore, Context, Error, ProcessFilter, ProcessTree, Protocol,
    ResolveOptions, SortField, SortOrder,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return ExitCode::SUCCESS;
    }

    let config = match ConfigStore::new() {
        Ok(store) => store.load().await.unwrap_or_default(),
        Err(_) => Config::default(),
    };
    let context = match Context::new(config) {
        Ok(context) => context,
        Err(e) => return report(e),
    };

    let result = match args[1].as_str() {
        "ps" => list_processes(&context, args.get(2)).await,
        "tree" => match args.get(2).and_then(|a| a.parse().ok()) {
            Some(pid) => show_tree(&context, pid).await,
            None => usage("interactive tree <pid>"),
        },
        "kill" => {
            let force = args.get(2).map(String::as_str) == Some("-f");
            let pid_arg = if force { args.get(3) } else { args.get(2) };
            match pid_arg.and_then(|a| a.parse().ok()) {
                Some(pid) => kill_process(&context, pid, force).await,
                None => usage("interactive kill [-f] <pid>"),
            }
        }
        "free" => match (args.get(2), args.get(3)) {
            (Some(start), Some(end)) => find_free(&context, start, end).await,
            _ => usage("interactive free <start> <end>"),
        },
        "suggest" => match args.get(2) {
            Some(port) => suggest(&context, port).await,
            None => usage("interactive suggest <port>"),
        },
        "resolve" => {
            if args.len() < 4 {
                usage("interactive resolve <port> <command...>")
            } else {
                resolve(&context, &args[2], &args[3..].join(" ")).await
            }
        }
        "metrics" => show_metrics(&context).await,
        "config" => {
            match serde_json::to_string_pretty(context.config()) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Failed to render config: {}", e),
            }
            Ok(())
        }
        "help" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(e),
    }
}

fn print_help() {
    println!(
        r#"procport Core - Interactive Testing

USAGE:
    cargo run --example interactive <command> [args]

COMMANDS:
    ps [name]                 List processes, optionally matching a name
    tree <pid>                Show a process and its descendants
    kill [-f] <pid>           Kill a process (-f for SIGKILL)
    free <start> <end>        Find the first free TCP port in a range
    suggest <port>            Suggest free ports near a busy one
    resolve <port> <cmd...>   Kill whatever holds a port and run a command
    metrics                   Show host metrics
    config                    Show current configuration
    help                      Show this help message

EXAMPLES:
    cargo run --example interactive ps node
    cargo run --example interactive free 3000 3100
    cargo run --example interactive resolve 8080 echo ready
"#
    );
}

fn usage(text: &str) -> Result<(), Error> {
    eprintln!("Usage: {}", text);
    Ok(())
}

fn report(error: Error) -> ExitCode {
    eprintln!("Error: {}", error.user_message());
    for hint in error.suggestions() {
        eprintln!("  hint: {}", hint);
    }
    ExitCode::from(i32::from(error.exit_code()) as u8)
}

async fn list_processes(context: &Context, name: Option<&String>) -> Result<(), Error> {
    let manager = context.process_manager();
    let mut filter = ProcessFilter::new().sorted_by(SortField::Cpu, SortOrder::Desc);
    if let Some(name) = name {
        filter = filter.with_name(name.as_str());
    }

    let processes = manager.list_all(&filter).await?;
    println!(
        "{:<8} {:<8} {:<20} {:>6} {:>10} {:<9}",
        "PID", "PPID", "NAME", "CPU%", "MEM(KB)", "STATUS"
    );
    println!("{}", "-".repeat(70));
    for p in processes.iter().take(40) {
        println!(
            "{:<8} {:<8} {:<20} {:>6.1} {:>10} {:<9}",
            p.pid,
            p.ppid.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
            truncate(&p.name, 20),
            p.cpu_percent,
            p.memory_bytes / 1024,
            p.status
        );
    }
    println!("\nTotal: {} processes", processes.len());
    Ok(())
}

async fn show_tree(context: &Context, pid: u32) -> Result<(), Error> {
    match context.process_manager().get_process_tree(pid).await? {
        Some(tree) => print_tree(&tree, 0),
        None => println!("Process {} not found.", pid),
    }
    Ok(())
}

fn print_tree(tree: &ProcessTree, depth: usize) {
    println!(
        "{}{} {}",
        "  ".repeat(depth),
        tree.process.pid,
        truncate(&tree.process.command, 60)
    );
    for child in &tree.children {
        print_tree(child, depth + 1);
    }
}

async fn kill_process(context: &Context, pid: u32, force: bool) -> Result<(), Error> {
    println!(
        "Killing process {} ({})...",
        pid,
        if force { "SIGKILL" } else { "SIGTERM" }
    );
    if context.process_manager().kill(pid, force).await? {
        println!("Process {} signalled.", pid);
    }
    Ok(())
}

async fn find_free(context: &Context, start: &str, end: &str) -> Result<(), Error> {
    let (start, end) = (parse_port(start)?, parse_port(end)?);
    let port = context
        .port_scanner()
        .find_free_port(start, end, Protocol::Tcp)
        .await?;
    println!("Free port: {}", port);
    Ok(())
}

async fn suggest(context: &Context, port: &str) -> Result<(), Error> {
    let port = parse_port(port)?;
    let ports = context
        .port_scanner()
        .suggest_alternative_ports(port, 5)
        .await?;
    println!("Alternatives to {}: {:?}", port, ports);
    Ok(())
}

async fn resolve(context: &Context, port: &str, command: &str) -> Result<(), Error> {
    let port = parse_port(port)?;
    let outcome = context
        .port_scanner()
        .resolve_conflict(port, command, ResolveOptions::default())
        .await?;

    for process in &outcome.killed_processes {
        println!("Killed {} ({})", process.pid, process.name);
    }
    if let Some(output) = &outcome.command_output {
        print!("{}", output);
    }
    if outcome.success {
        println!("Resolved port {} in {}ms", port, outcome.duration_ms);
    } else if let Some(error) = &outcome.error {
        eprintln!("Resolution failed: {}", error);
    }
    Ok(())
}

async fn show_metrics(context: &Context) -> Result<(), Error> {
    let metrics = context.process_manager().system_metrics().await?;
    match serde_json::to_string_pretty(&metrics) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to render metrics: {}", e),
    }
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
