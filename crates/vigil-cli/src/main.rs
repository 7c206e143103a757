use std::env;
use std::net::SocketAddr;

use chrono::Utc;
use contracts::{Actor, Role};
use vigil_api::{serve, BoardRow, TrackerApi};

fn print_usage() {
    println!("vigil <command>");
    println!("commands:");
    println!("  now");
    println!("  seed [sqlite_path]");
    println!("  board <group_id> [sqlite_path]");
    println!("  import <group_id> <file> [sqlite_path]");
    println!("  serve [addr] [sqlite_path]");
    println!("    default addr: 127.0.0.1:8080");
    println!("sqlite_path defaults to $VIGIL_SQLITE_PATH, then vigil.sqlite");
}

fn parse_group_id(value: Option<&String>) -> Result<u64, String> {
    let raw = value.ok_or_else(|| "missing group_id".to_string())?;
    raw.parse::<u64>()
        .map_err(|_| format!("invalid group_id: {raw}"))
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value.map(String::as_str).unwrap_or("127.0.0.1:8080");
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn default_sqlite_path() -> String {
    std::env::var("VIGIL_SQLITE_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "vigil.sqlite".to_string())
}

fn parse_sqlite_path(value: Option<&String>) -> String {
    value
        .map(String::to_string)
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(default_sqlite_path)
}

fn cli_actor() -> Actor {
    Actor::new("cli", Role::PlatformAdmin, None)
}

fn open_tracker(path: &str) -> Result<TrackerApi, String> {
    TrackerApi::open(path).map_err(|err| format!("failed to open {path}: {err}"))
}

fn print_bucket(label: &str, rows: &[BoardRow]) {
    if rows.is_empty() {
        return;
    }
    println!("{label}:");
    for row in rows {
        let next = row.next_wall.as_deref().unwrap_or("--:--");
        let missed = if row.missed_total > 0 {
            format!(" missed={}", row.missed_total)
        } else {
            String::new()
        };
        println!(
            "  {} next={} ({}) [{}]{}",
            row.name, next, row.cadence_raw, row.location, missed
        );
    }
}

fn run_seed(args: &[String]) -> Result<(), String> {
    let sqlite_path = parse_sqlite_path(args.get(2));
    let mut api = open_tracker(&sqlite_path)?;
    let seeded = api
        .seed_kinds()
        .map_err(|err| format!("seeding failed: {err}"))?;
    println!("seeded {seeded} encounter kinds into {sqlite_path}");
    Ok(())
}

fn run_board(args: &[String]) -> Result<(), String> {
    let group_id = parse_group_id(args.get(2))?;
    let sqlite_path = parse_sqlite_path(args.get(3));
    let api = open_tracker(&sqlite_path)?;
    let board = api
        .board(group_id, Utc::now())
        .map_err(|err| format!("board failed: {err}"))?;

    println!("server time {}", board.server_time);
    print_bucket("tracked", &board.tracked);
    print_bucket("forgotten", &board.forgotten);
    print_bucket("fixed schedule", &board.fixed);
    print_bucket("untracked", &board.untracked);
    Ok(())
}

fn run_import(args: &[String]) -> Result<(), String> {
    let group_id = parse_group_id(args.get(2))?;
    let file = args.get(3).ok_or_else(|| "missing file".to_string())?;
    let sqlite_path = parse_sqlite_path(args.get(4));

    let text =
        std::fs::read_to_string(file).map_err(|err| format!("failed to read {file}: {err}"))?;

    let mut api = open_tracker(&sqlite_path)?;
    let report = api
        .import_history(group_id, &text, &cli_actor(), Utc::now())
        .map_err(|err| format!("import failed: {err}"))?;

    println!("imported {} lines", report.imported);
    for skip in &report.skipped {
        println!("  skipped line {}: {} ({})", skip.line_no, skip.raw, skip.reason);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("now") => {
            let now = Utc::now();
            println!("{}", now.to_rfc3339());
        }
        Some("seed") => {
            if let Err(err) = run_seed(&args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        Some("board") => {
            if let Err(err) = run_board(&args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        Some("import") => {
            if let Err(err) = run_import(&args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        Some("serve") => match parse_socket_addr(args.get(2)) {
            Ok(addr) => {
                let sqlite_path = parse_sqlite_path(args.get(3));
                let api = match open_tracker(&sqlite_path) {
                    Ok(api) => api,
                    Err(err) => {
                        eprintln!("error: {err}");
                        std::process::exit(2);
                    }
                };
                println!("serving api on http://{addr} (store: {sqlite_path})");
                if let Err(err) = serve(addr, api).await {
                    eprintln!("server error: {err}");
                    std::process::exit(1);
                }
            }
            Err(err) => {
                eprintln!("error: {}", err);
                print_usage();
                std::process::exit(2);
            }
        },
        _ => {
            print_usage();
        }
    }
}
