use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use whoport_core::schema::{PORT_REPORT_V1, PROCESS_LIST_V1, PROCESS_REPORT_V1};
use whoport_core::{get_platform, WhoportError};
use whoport_net::{resolve_port, ConnectionRecord};
use whoport_proc::{
    ancestry, environment, get_process, list_processes, AncestryChain, EnvironmentSet,
    ProcessSnapshot, ProcessState,
};
use whoport_signal::{process_exists, terminate};

/// Resolve TCP ports to their owning processes and inspect process state.
#[derive(Parser, Debug)]
#[command(name = "whoport", version, about, long_about = None)]
struct Cli {
    /// The format for log output.
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// The minimum log level to display.
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the processes using a TCP port.
    ///
    /// Reads the kernel's connection tables, filters for PORT, and joins
    /// each match against its owning process. Exits with code 1 when
    /// nothing is using the port.
    Port(PortArgs),

    /// Show the full snapshot of one process.
    ///
    /// Includes identity, command line, owner, state, memory figures, and
    /// start time. The ancestry chain and environment are available as
    /// additional views.
    Pid(PidArgs),

    /// List all visible processes.
    List(ListArgs),
}

#[derive(Parser, Debug)]
struct PortArgs {
    /// TCP port to resolve.
    #[arg(value_name = "PORT", value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Output a JSON report.
    #[arg(long)]
    json: bool,

    /// One line per connection, pid:name:state form.
    #[arg(long, conflicts_with = "json")]
    short: bool,

    /// Append heuristic findings about the port's owners.
    #[arg(long)]
    warnings: bool,

    /// Prompt to terminate the first resolved owner.
    #[arg(long, conflicts_with = "json")]
    interactive: bool,
}

#[derive(Parser, Debug)]
struct PidArgs {
    /// Target process ID.
    #[arg(value_name = "PID", value_parser = clap::value_parser!(u32).range(1..))]
    pid: u32,

    /// Output a JSON report.
    #[arg(long)]
    json: bool,

    /// One line, pid:name:state form.
    #[arg(long, conflicts_with = "json")]
    short: bool,

    /// Render the ancestry chain instead of the detail block.
    #[arg(long, conflicts_with_all = ["json", "short"])]
    tree: bool,

    /// Append the process's environment variables.
    #[arg(long, conflicts_with_all = ["short", "tree"])]
    env: bool,

    /// Prompt to terminate the process after rendering.
    #[arg(long, conflicts_with = "json")]
    interactive: bool,
}

#[derive(Parser, Debug)]
struct ListArgs {
    /// Output a JSON report.
    #[arg(long)]
    json: bool,

    /// One line per process, pid and name only.
    #[arg(long, conflicts_with = "json")]
    short: bool,
}

#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    /// Human-readable text format.
    Text,
    /// Machine-readable JSON format.
    Json,
}

fn main() {
    let cli = Cli::parse();

    // Initialize the tracing subscriber
    let filter = EnvFilter::from_default_env().add_directive(cli.log_level.into());

    match cli.log_format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    info!("Setup complete. Starting command processing.");
    if let Some(command) = cli.command {
        match run_command(command) {
            Ok(exit_code) => {
                info!("Command processing finished.");
                std::process::exit(exit_code);
            }
            Err(err) => {
                eprintln!("Error: {err}");
                std::process::exit(1);
            }
        }
    } else {
        println!("Platform: {}", get_platform());
    }
    info!("Command processing finished.");
}

fn run_command(command: Command) -> Result<i32, WhoportError> {
    match command {
        Command::Port(args) => run_port(args),
        Command::Pid(args) => run_pid(args),
        Command::List(args) => run_list(args),
    }
}

// ============================================================================
// Port Resolution
// ============================================================================

#[derive(serde::Serialize)]
struct PortConnectionJson {
    connection: ConnectionRecord,
    process: Option<ProcessSnapshot>,
}

#[derive(serde::Serialize)]
struct PortReportJson {
    schema_id: &'static str,
    platform: &'static str,
    timestamp: String,
    port: u16,
    connections: Vec<PortConnectionJson>,
    warnings: Option<Vec<String>>,
}

fn run_port(args: PortArgs) -> Result<i32, WhoportError> {
    let records = resolve_port(args.port)?;

    // Join each resolved owner against its snapshot, once per distinct pid.
    let mut snapshots: HashMap<u32, ProcessSnapshot> = HashMap::new();
    for record in &records {
        if let Some(pid) = record.pid {
            if !snapshots.contains_key(&pid) {
                // The owner can exit between the table read and this query.
                if let Ok(snap) = get_process(pid) {
                    snapshots.insert(pid, snap);
                }
            }
        }
    }

    let warnings = if args.warnings {
        analyze_port_owners(args.port, &records, &snapshots)
    } else {
        Vec::new()
    };

    if args.json {
        let report = PortReportJson {
            schema_id: PORT_REPORT_V1,
            platform: get_platform(),
            timestamp: current_timestamp(),
            port: args.port,
            connections: records
                .iter()
                .map(|record| PortConnectionJson {
                    connection: record.clone(),
                    process: record.pid.and_then(|pid| snapshots.get(&pid).cloned()),
                })
                .collect(),
            warnings: args.warnings.then_some(warnings),
        };
        println!("{}", serde_json::to_string_pretty(&report).unwrap());
        return Ok(if records.is_empty() { 1 } else { 0 });
    }

    if records.is_empty() {
        println!("No process found using port {}.", args.port);
        return Ok(1);
    }

    if args.short {
        for record in &records {
            let pid = record
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("{}:{}:{}", pid, owner_name(record, &snapshots), record.state);
        }
    } else {
        print_port_table(&records, &snapshots);
    }

    for w in &warnings {
        eprintln!("Warning: {w}");
    }

    if args.interactive {
        match first_owner(&records, &snapshots) {
            Some(snap) => prompt_terminate(snap),
            None => println!("No resolved owner to prompt for."),
        }
    }

    Ok(0)
}

/// Heuristic findings about the processes bound to a port.
fn analyze_port_owners(
    port: u16,
    records: &[ConnectionRecord],
    snapshots: &HashMap<u32, ProcessSnapshot>,
) -> Vec<String> {
    let mut owners: Vec<u32> = records.iter().filter_map(|r| r.pid).collect();
    owners.sort_unstable();
    owners.dedup();

    let mut warnings = Vec::new();

    for pid in &owners {
        let snap = match snapshots.get(pid) {
            Some(snap) => snap,
            None => continue,
        };
        if snap.uid == 0 && port >= 1024 {
            warnings.push(format!(
                "pid {pid} ({}) running as root on non-system port {port}",
                snap.name
            ));
        }
        if snap.state == ProcessState::Zombie {
            warnings.push(format!(
                "pid {pid} ({}) is a zombie process holding port {port}",
                snap.name
            ));
        }
    }

    if owners.len() > 1 {
        let list = owners
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        warnings.push(format!("multiple processes bound to port {port}: {list}"));
    }

    warnings
}

/// First connection whose owner resolved to a live snapshot.
fn first_owner<'a>(
    records: &[ConnectionRecord],
    snapshots: &'a HashMap<u32, ProcessSnapshot>,
) -> Option<&'a ProcessSnapshot> {
    records
        .iter()
        .filter_map(|r| r.pid)
        .find_map(|pid| snapshots.get(&pid))
}

fn owner_name<'a>(
    record: &ConnectionRecord,
    snapshots: &'a HashMap<u32, ProcessSnapshot>,
) -> &'a str {
    record
        .pid
        .and_then(|pid| snapshots.get(&pid))
        .map(|snap| snap.name.as_str())
        .unwrap_or("-")
}

/// Print connections in table format.
fn print_port_table(records: &[ConnectionRecord], snapshots: &HashMap<u32, ProcessSnapshot>) {
    println!(
        "{:<5} {:<24} {:<24} {:<12} {:>7} NAME",
        "PROTO", "LOCAL", "REMOTE", "STATE", "PID"
    );
    println!("{:-<88}", "");

    for record in records {
        let local = format!("{}:{}", record.local_addr, record.local_port);
        let remote = if record.remote_port == 0 {
            "-".to_string()
        } else {
            format!("{}:{}", record.remote_addr, record.remote_port)
        };
        let pid = record
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<5} {:<24} {:<24} {:<12} {:>7} {}",
            record.protocol.as_str(),
            truncate(&local, 24),
            truncate(&remote, 24),
            record.state.as_str(),
            pid,
            truncate(owner_name(record, snapshots), 32)
        );
    }
}

// ============================================================================
// Process Inspection
// ============================================================================

#[derive(serde::Serialize)]
struct ProcessReportJson {
    schema_id: &'static str,
    platform: &'static str,
    timestamp: String,
    process: ProcessSnapshot,
    ancestry: Option<Vec<ProcessSnapshot>>,
    environment: Option<Vec<String>>,
}

fn run_pid(args: PidArgs) -> Result<i32, WhoportError> {
    let snap = get_process(args.pid)?;

    if args.json {
        let chain = ancestry(args.pid)?;
        let env_entries = if args.env {
            Some(environment(args.pid)?.entries)
        } else {
            None
        };
        let report = ProcessReportJson {
            schema_id: PROCESS_REPORT_V1,
            platform: get_platform(),
            timestamp: current_timestamp(),
            process: snap,
            ancestry: Some(chain.processes),
            environment: env_entries,
        };
        println!("{}", serde_json::to_string_pretty(&report).unwrap());
        return Ok(0);
    }

    if args.short {
        println!("{}:{}:{}", snap.pid, snap.name, snap.state.code());
    } else if args.tree {
        print_ancestry_tree(&ancestry(args.pid)?);
    } else {
        print_process_detail(&snap);
        if args.env {
            print_environment(&environment(args.pid)?);
        }
    }

    if args.interactive {
        prompt_terminate(&snap);
    }

    Ok(0)
}

/// Render the ancestry chain, leaf first, each ancestor nested one level
/// deeper.
fn print_ancestry_tree(chain: &AncestryChain) {
    for (depth, snap) in chain.processes.iter().enumerate() {
        if depth == 0 {
            println!("{} {}", snap.pid, snap.name);
        } else {
            println!("{}└─ {} {}", "  ".repeat(depth - 1), snap.pid, snap.name);
        }
    }
}

/// Print the detail block for one process.
fn print_process_detail(snap: &ProcessSnapshot) {
    println!("PID:      {}", snap.pid);
    println!("PPID:     {}", snap.ppid);
    println!("Name:     {}", snap.name);
    println!("Command:  {}", snap.cmdline);
    println!("User:     {} (uid {})", snap.user, snap.uid);
    println!("State:    {} ({})", state_word(snap.state), snap.state.code());
    println!("VSZ:      {} kB", snap.vsz_kb);
    println!("RSS:      {} kB", snap.rss_kb);
    println!("Started:  {}", format_start_time(snap.start_time));
}

fn state_word(state: ProcessState) -> &'static str {
    match state {
        ProcessState::Running => "running",
        ProcessState::Sleeping => "sleeping",
        ProcessState::Stopped => "stopped",
        ProcessState::Zombie => "zombie",
        ProcessState::Idle => "idle",
        ProcessState::Unknown => "unknown",
    }
}

fn print_environment(env: &EnvironmentSet) {
    println!();
    println!("Environment ({} entries):", env.entries.len());
    for entry in &env.entries {
        println!("  {entry}");
    }
}

// ============================================================================
// Process Listing
// ============================================================================

#[derive(serde::Serialize)]
struct ProcessListJson {
    schema_id: &'static str,
    platform: &'static str,
    timestamp: String,
    count: usize,
    processes: Vec<ProcessSnapshot>,
}

fn run_list(args: ListArgs) -> Result<i32, WhoportError> {
    let mut processes = list_processes()?;
    // Enumeration order is kernel order; sort for stable display.
    processes.sort_by_key(|p| p.pid);

    if args.json {
        let report = ProcessListJson {
            schema_id: PROCESS_LIST_V1,
            platform: get_platform(),
            timestamp: current_timestamp(),
            count: processes.len(),
            processes,
        };
        println!("{}", serde_json::to_string_pretty(&report).unwrap());
        return Ok(0);
    }

    if args.short {
        for p in &processes {
            println!("{} {}", p.pid, p.name);
        }
        return Ok(0);
    }

    print_process_table(&processes);
    Ok(0)
}

/// Print processes in table format.
fn print_process_table(processes: &[ProcessSnapshot]) {
    println!(
        "{:>7} {:>7} {:<12} {:>5} {:>10} {:>9} COMMAND",
        "PID", "PPID", "USER", "STATE", "VSZ(KB)", "RSS(KB)"
    );
    println!("{:-<96}", "");

    if processes.is_empty() {
        println!("(no visible processes)");
        return;
    }

    for p in processes {
        println!(
            "{:>7} {:>7} {:<12} {:>5} {:>10} {:>9} {}",
            p.pid,
            p.ppid,
            truncate(&p.user, 12),
            p.state.code(),
            p.vsz_kb,
            p.rss_kb,
            truncate(&p.cmdline, 48)
        );
    }
}

// ============================================================================
// Interactive Termination
// ============================================================================

/// Ask for one keypress and deliver SIGTERM on confirmation.
///
/// Every failure path prints a message and returns; nothing here may abort
/// the surrounding render.
fn prompt_terminate(snap: &ProcessSnapshot) {
    print!(
        "Kill {} (pid {})? [k = SIGTERM, any other key = skip] ",
        snap.name, snap.pid
    );
    let _ = std::io::stdout().flush();

    let confirmed = read_single_key();
    println!();

    if !confirmed {
        println!("Skipped.");
        return;
    }

    if let Err(e) = terminate(snap.pid) {
        println!("Could not signal pid {}: {e}", snap.pid);
        return;
    }

    // Grace period before checking whether the signal landed.
    std::thread::sleep(Duration::from_millis(100));

    match process_exists(snap.pid) {
        Ok(false) => println!("Process {} terminated.", snap.pid),
        Ok(true) => println!(
            "Process {} still running; escalate with kill -9 {}.",
            snap.pid, snap.pid
        ),
        Err(e) => println!("Could not re-probe pid {}: {e}", snap.pid),
    }
}

/// Read exactly one keypress in raw mode; true when it confirms the kill.
fn read_single_key() -> bool {
    use crossterm::event::{read, Event, KeyCode, KeyEventKind};
    use crossterm::terminal;

    if terminal::enable_raw_mode().is_err() {
        // Not a terminal; treat as skip.
        return false;
    }

    let mut confirmed = false;
    loop {
        match read() {
            // Key releases are reported on some platforms; only presses count.
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                confirmed = matches!(key.code, KeyCode::Char('k') | KeyCode::Char('K'));
                break;
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    let _ = terminal::disable_raw_mode();
    confirmed
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// Current wall-clock time in RFC 3339 form for report envelopes.
fn current_timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Render a start timestamp, or "-" when the kernel didn't provide one.
fn format_start_time(start_time: u64) -> String {
    if start_time == 0 {
        return "-".to_string();
    }
    time::OffsetDateTime::from_unix_timestamp(start_time as i64)
        .ok()
        .and_then(|t| t.format(&time::format_description::well_known::Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string())
}

/// Truncate string to max characters (not bytes).
///
/// Safe for UTF-8 strings with multi-byte characters.
fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s, // String has fewer than max_chars characters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Argument Parsing Tests
    // ========================================================================

    #[test]
    fn port_requires_a_value() {
        assert!(Cli::try_parse_from(["whoport", "port"]).is_err());
    }

    #[test]
    fn port_rejects_zero() {
        assert!(Cli::try_parse_from(["whoport", "port", "0"]).is_err());
    }

    #[test]
    fn port_rejects_out_of_range() {
        assert!(Cli::try_parse_from(["whoport", "port", "65536"]).is_err());
    }

    #[test]
    fn port_parses_flags() {
        let cli = Cli::try_parse_from(["whoport", "port", "8080", "--warnings"]).unwrap();
        let Command::Port(args) = cli.command.unwrap() else {
            panic!("expected port command");
        };
        assert_eq!(args.port, 8080);
        assert!(args.warnings);
        assert!(!args.json);
    }

    #[test]
    fn port_json_conflicts_with_short() {
        assert!(Cli::try_parse_from(["whoport", "port", "8080", "--json", "--short"]).is_err());
    }

    #[test]
    fn port_interactive_conflicts_with_json() {
        assert!(
            Cli::try_parse_from(["whoport", "port", "8080", "--interactive", "--json"]).is_err()
        );
    }

    #[test]
    fn pid_rejects_zero() {
        assert!(Cli::try_parse_from(["whoport", "pid", "0"]).is_err());
    }

    #[test]
    fn pid_parses_env_with_json() {
        let cli = Cli::try_parse_from(["whoport", "pid", "1234", "--json", "--env"]).unwrap();
        let Command::Pid(args) = cli.command.unwrap() else {
            panic!("expected pid command");
        };
        assert_eq!(args.pid, 1234);
        assert!(args.json);
        assert!(args.env);
    }

    #[test]
    fn pid_tree_conflicts_with_json_and_short() {
        assert!(Cli::try_parse_from(["whoport", "pid", "1234", "--tree", "--json"]).is_err());
        assert!(Cli::try_parse_from(["whoport", "pid", "1234", "--tree", "--short"]).is_err());
    }

    #[test]
    fn pid_env_conflicts_with_short_and_tree() {
        assert!(Cli::try_parse_from(["whoport", "pid", "1234", "--env", "--short"]).is_err());
        assert!(Cli::try_parse_from(["whoport", "pid", "1234", "--env", "--tree"]).is_err());
    }

    #[test]
    fn list_parses_short() {
        let cli = Cli::try_parse_from(["whoport", "list", "--short"]).unwrap();
        let Command::List(args) = cli.command.unwrap() else {
            panic!("expected list command");
        };
        assert!(args.short);
    }

    #[test]
    fn list_json_conflicts_with_short() {
        assert!(Cli::try_parse_from(["whoport", "list", "--json", "--short"]).is_err());
    }

    // ========================================================================
    // Warnings Analysis Tests
    // ========================================================================

    fn make_snapshot(pid: u32, uid: u32, state: ProcessState) -> ProcessSnapshot {
        ProcessSnapshot {
            pid,
            ppid: 1,
            name: format!("proc{pid}"),
            cmdline: format!("/usr/bin/proc{pid}"),
            user: "svc".to_string(),
            uid,
            state,
            vsz_kb: 1024,
            rss_kb: 256,
            start_time: 1_700_000_000,
        }
    }

    fn make_record(port: u16, pid: Option<u32>) -> ConnectionRecord {
        ConnectionRecord {
            protocol: whoport_net::Protocol::Tcp,
            local_addr: "127.0.0.1".to_string(),
            local_port: port,
            remote_addr: "*".to_string(),
            remote_port: 0,
            state: whoport_net::TcpState::Listen,
            pid,
        }
    }

    #[test]
    fn warnings_flag_root_on_high_port() {
        let records = vec![make_record(8080, Some(42))];
        let mut snapshots = HashMap::new();
        snapshots.insert(42, make_snapshot(42, 0, ProcessState::Sleeping));

        let warnings = analyze_port_owners(8080, &records, &snapshots);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("running as root on non-system port"));
    }

    #[test]
    fn warnings_accept_root_on_system_port() {
        let records = vec![make_record(443, Some(42))];
        let mut snapshots = HashMap::new();
        snapshots.insert(42, make_snapshot(42, 0, ProcessState::Sleeping));

        assert!(analyze_port_owners(443, &records, &snapshots).is_empty());
    }

    #[test]
    fn warnings_flag_zombie_owner() {
        let records = vec![make_record(9000, Some(7))];
        let mut snapshots = HashMap::new();
        snapshots.insert(7, make_snapshot(7, 1000, ProcessState::Zombie));

        let warnings = analyze_port_owners(9000, &records, &snapshots);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("zombie process holding port"));
    }

    #[test]
    fn warnings_flag_multiple_owners() {
        let records = vec![make_record(9000, Some(7)), make_record(9000, Some(8))];
        let mut snapshots = HashMap::new();
        snapshots.insert(7, make_snapshot(7, 1000, ProcessState::Sleeping));
        snapshots.insert(8, make_snapshot(8, 1000, ProcessState::Sleeping));

        let warnings = analyze_port_owners(9000, &records, &snapshots);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("multiple processes bound to port 9000"));
        assert!(warnings[0].contains("7, 8"));
    }

    #[test]
    fn warnings_ignore_duplicate_records_of_one_owner() {
        // The same process listening on v4 and v6 is one owner, not two.
        let records = vec![make_record(9000, Some(7)), make_record(9000, Some(7))];
        let mut snapshots = HashMap::new();
        snapshots.insert(7, make_snapshot(7, 1000, ProcessState::Sleeping));

        assert!(analyze_port_owners(9000, &records, &snapshots).is_empty());
    }

    #[test]
    fn warnings_skip_unresolved_owners() {
        let records = vec![make_record(9000, None)];
        let snapshots = HashMap::new();

        assert!(analyze_port_owners(9000, &records, &snapshots).is_empty());
    }

    // ========================================================================
    // Rendering Helper Tests
    // ========================================================================

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("héllo", 2), "hé");
    }

    #[test]
    fn start_time_zero_renders_dash() {
        assert_eq!(format_start_time(0), "-");
    }

    #[test]
    fn start_time_renders_rfc3339() {
        let rendered = format_start_time(1_700_000_000);
        assert!(
            rendered.starts_with("2023-11-14T"),
            "unexpected rendering: {rendered}"
        );
    }

    #[test]
    fn first_owner_skips_unresolved_records() {
        let records = vec![make_record(80, None), make_record(80, Some(42))];
        let mut snapshots = HashMap::new();
        snapshots.insert(42, make_snapshot(42, 0, ProcessState::Running));

        let owner = first_owner(&records, &snapshots).unwrap();
        assert_eq!(owner.pid, 42);
    }
}
