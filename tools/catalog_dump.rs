//! Catalog inspector.
//!
//! Loads a TOML catalog, prints every deployed resource with its policies,
//! and optionally runs one check request against it.
//!
//! Output format:
//!   API  VERSION  VHOST  METHOD  PATH | POLICIES
//!   * = any host
//!
//! Usage:
//!   cargo run --bin catalog_dump -- <catalog.toml> [--check METHOD PATH] [--host HOST] [--header NAME:VALUE]...

use gateway_authz::{Catalog, CatalogConfig, CheckRequest, RequestHandler};
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

struct Check {
    method: String,
    path: String,
    host: Option<String>,
    headers: Vec<(String, String)>,
}

fn print_help() {
    println!("Catalog inspector");
    println!();
    println!("Usage: catalog_dump <catalog.toml> [OPTIONS]");
    println!();
    println!("Output format:");
    println!("  API  VERSION  VHOST  METHOD  PATH | POLICIES");
    println!("  * = any host");
    println!();
    println!("Options:");
    println!("  --check METHOD PATH   Run a check request and print the response");
    println!("  --host HOST           Authority for the check request");
    println!("  --header NAME:VALUE   Header for the check request (repeatable)");
    println!("  --help                Show this help message");
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn print_catalog(catalog: &Catalog) {
    let snapshot = catalog.snapshot();
    if snapshot.apis().is_empty() {
        println!("\nNo APIs deployed.");
        return;
    }

    println!(
        "\n{:<20} {:<8} {:<20} {:<7} {:<30} | POLICIES",
        "API", "VERSION", "VHOST", "METHOD", "PATH"
    );
    println!("{}", "-".repeat(100));

    for api in snapshot.apis() {
        for resource in api.resources() {
            let path = format!("{}{}", api.context().trim_end_matches('/'), resource.template());
            let policies: Vec<&str> = resource.policies().iter().map(|p| p.name()).collect();
            println!(
                "{:<20} {:<8} {:<20} {:<7} {:<30} | {}",
                truncate(api.name(), 20),
                truncate(api.version(), 8),
                truncate(api.vhost().unwrap_or("*"), 20),
                resource.method().as_str(),
                truncate(&path, 30),
                if policies.is_empty() { "-".to_string() } else { policies.join(", ") }
            );
        }
        if api.resources().is_empty() {
            println!(
                "{:<20} {:<8} {:<20} {:<7} {:<30} | (no resources)",
                truncate(api.name(), 20),
                truncate(api.version(), 8),
                truncate(api.vhost().unwrap_or("*"), 20),
                "-",
                truncate(api.context(), 30)
            );
        }
    }
}

fn run_check(catalog: Catalog, check: Check) -> Result<(), String> {
    let mut request = CheckRequest::http(check.method, check.path);
    if let Some(host) = check.host {
        request = request.with_host(host);
    }
    for (name, value) in check.headers {
        request = request.with_header(name.to_ascii_lowercase(), value);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;
    let handler = RequestHandler::new(Arc::new(catalog));
    let response = runtime.block_on(handler.process(&request));

    let json = serde_json::to_string_pretty(&response).map_err(|e| e.to_string())?;
    println!("\n{json}");
    Ok(())
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    process::exit(1);
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help") {
        print_help();
        return;
    }

    let mut file: Option<PathBuf> = None;
    let mut check: Option<Check> = None;
    let mut host: Option<String> = None;
    let mut headers = Vec::new();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--check" => {
                let (Some(method), Some(path)) = (iter.next(), iter.next()) else {
                    fail("--check needs METHOD and PATH");
                };
                check = Some(Check {
                    method,
                    path,
                    host: None,
                    headers: Vec::new(),
                });
            }
            "--host" => {
                host = Some(iter.next().unwrap_or_else(|| fail("--host needs a value")));
            }
            "--header" => {
                let raw = iter.next().unwrap_or_else(|| fail("--header needs NAME:VALUE"));
                let Some((name, value)) = raw.split_once(':') else {
                    fail(&format!("header '{raw}' is not NAME:VALUE"));
                };
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
            _ if !arg.starts_with('-') => file = Some(PathBuf::from(&arg)),
            _ => fail(&format!("Unknown option: {arg}")),
        }
    }

    let Some(file) = file else {
        fail("no catalog file given");
    };

    println!("Loading catalog: {}", file.display());
    let snapshot = CatalogConfig::from_file(&file)
        .and_then(CatalogConfig::into_snapshot)
        .unwrap_or_else(|e| fail(&e.to_string()));
    let catalog = Catalog::new(snapshot);

    print_catalog(&catalog);

    if let Some(mut check) = check {
        check.host = host;
        check.headers = headers;
        if let Err(e) = run_check(catalog, check) {
            fail(&e);
        }
    }
}
