//! Interactive admin shell: a thin line-oriented front end over the
//! node's typed operations. Parsing and table formatting only; all
//! behavior lives in the core.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::node::{FileScope, Node};
use crate::utils::fmt::{format_file_size, format_speed, short_hash};
use crate::utils::sos::SignalOfStop;

/// Run the command loop until `exit` or cancellation.
pub async fn run(node: Arc<Node>, sos: SignalOfStop) -> anyhow::Result<()> {
    println!("peershare node ready. Type 'help' for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("p2p> ");
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            _ = sos.wait() => break,
            line = lines.next_line() => line?,
        };
        let line = match line {
            Some(line) => line,
            None => break, // EOF (Ctrl+D)
        };
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = args.first() else {
            continue;
        };

        match command {
            "peers" => cmd_peers(&node),
            "files" => cmd_files(&node, args.get(1).copied()),
            "get" => cmd_get(&node, &args[1..]),
            "share" => cmd_share(&node, &args[1..]).await,
            "connect" => cmd_connect(&node, &args[1..]).await,
            "status" => cmd_status(&node),
            "downloads" => cmd_downloads(&node),
            "cancel" => cmd_cancel(&node, &args[1..]),
            "help" => print_help(),
            "exit" | "quit" => break,
            other => println!("Unknown command: {other}. Type 'help' for available commands."),
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn cmd_peers(node: &Node) {
    let peers = node.peers();
    if peers.is_empty() {
        println!("No known peers.");
        return;
    }
    println!("{:<24} {:<22} {:<8} {:<6}", "ID", "ADDRESS", "ACTIVE", "FILES");
    for peer in peers {
        println!(
            "{:<24} {:<22} {:<8} {:<6}",
            peer.id,
            peer.addr(),
            if peer.active { "yes" } else { "no" },
            peer.files.len()
        );
    }
}

fn cmd_files(node: &Node, scope: Option<&str>) {
    let scope = match scope {
        None | Some("local") => FileScope::Local,
        Some(peer_id) => FileScope::Peer(peer_id.to_string()),
    };
    match node.files(scope) {
        Ok(files) if files.is_empty() => println!("No files."),
        Ok(files) => {
            println!("{:<32} {:>10}  {:<14}", "NAME", "SIZE", "HASH");
            for file in files {
                println!(
                    "{:<32} {:>10}  {:<14}",
                    file.filename,
                    format_file_size(file.size),
                    short_hash(&file.hash)
                );
            }
        }
        Err(e) => println!("Error: {e}"),
    }
}

fn cmd_get(node: &Node, args: &[&str]) {
    let Some(&filename) = args.first() else {
        println!("Usage: get <filename> [destination_path]");
        return;
    };
    let destination = args.get(1).map(PathBuf::from);
    match node.fetch(filename, destination) {
        Ok(()) => println!("Download started: {filename} (see 'downloads')"),
        Err(e) => println!("Error: {e}"),
    }
}

async fn cmd_share(node: &Node, args: &[&str]) {
    let Some(&path) = args.first() else {
        println!("Usage: share <filepath>");
        return;
    };
    match node.share(PathBuf::from(path)).await {
        Ok(filename) => println!("File shared successfully: {filename}"),
        Err(e) => println!("Error: {e}"),
    }
}

async fn cmd_connect(node: &Node, args: &[&str]) {
    let (Some(&ip), Some(&port)) = (args.first(), args.get(1)) else {
        println!("Usage: connect <ip> <port>");
        return;
    };
    let Ok(port) = port.parse::<u16>() else {
        println!("Invalid port: {port}");
        return;
    };
    match node.connect_peer(ip, port).await {
        Ok(peer) => println!(
            "Connected to {} ({} files advertised)",
            peer.addr(),
            peer.files.len()
        ),
        Err(e) => println!("Error: {e}"),
    }
}

fn cmd_status(node: &Node) {
    let status = node.status();
    println!("=== Node Status ===");
    println!("Node ID:          {}", status.node_id);
    println!("Local Port:       {}", status.port);
    println!("Shared Directory: {}", status.shared_dir.display());
    println!("Local Files:      {}", status.local_files);
    println!(
        "Peers:            {} total, {} active",
        status.total_peers, status.active_peers
    );
    println!("Connections:      {}", status.connections);
    println!("Downloads:        {} in flight", status.downloads_in_flight);
}

fn cmd_downloads(node: &Node) {
    let downloads = node.downloads();
    if downloads.is_empty() {
        println!("No downloads.");
        return;
    }
    for d in downloads {
        let state = if d.completed {
            "completed".to_string()
        } else if d.failed {
            format!("failed: {}", d.error_message)
        } else {
            format!(
                "{} at {}",
                format_file_size(d.downloaded_size),
                format_speed(d.speed_mbps)
            )
        };
        println!("{:<32} {}", d.filename, state);
    }
}

fn cmd_cancel(node: &Node, args: &[&str]) {
    let Some(&filename) = args.first() else {
        println!("Usage: cancel <filename>");
        return;
    };
    if node.cancel_download(filename) {
        println!("Cancellation requested: {filename}");
    } else {
        println!("No active download named {filename}");
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  peers                      List known peers");
    println!("  files [local|<peer_id>]    List local or peer files");
    println!("  get <filename> [dest]      Download a file from peers");
    println!("  share <path>               Copy a file into the shared directory");
    println!("  connect <ip> <port>        Connect to a peer");
    println!("  status                     Show node status");
    println!("  downloads                  Show download progress");
    println!("  cancel <filename>          Cancel an active download");
    println!("  help                       Show this help");
    println!("  exit                       Shut down");
}
