//! flowline CLI - exhibition flows with timeline lanes and paged listings.

use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use flowline::{
    Category, Config, Flow, FlowStore, LaneLayout, PageRequest, SaveFlow, Server, ValidationError, assign_lanes,
    generate_flow_id, is_server_running, stop_server,
};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;

use cli::{Cli, Command};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flowline")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("flowline.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Accept RFC 3339 or a bare date (midnight UTC).
fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid time '{}': expected RFC 3339 or YYYY-MM-DD", raw))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| eyre::eyre!("Invalid date '{}'", raw))?;
    Ok(midnight.and_utc())
}

fn format_category(flow: &Flow) -> ColoredString {
    match flow.category.unwrap_or(Category::Exhibition) {
        Category::Exhibition => "exhibition".green(),
        Category::Research => "research".yellow(),
        Category::Curation => "curation".blue(),
    }
}

fn format_span(flow: &Flow) -> String {
    let fmt = |t: Option<DateTime<Utc>>| t.map(|t| t.format("%Y-%m-%d").to_string()).unwrap_or_else(|| "?".into());
    if flow.start_time.is_none() && flow.end_time.is_none() {
        String::new()
    } else {
        format!(" {}..{}", fmt(flow.start_time), fmt(flow.end_time))
    }
}

fn print_flow_line(flow: &Flow) {
    println!(
        "{} {} v{} {}{}",
        format_category(flow),
        flow.id.cyan(),
        flow.version,
        flow.title,
        format_span(flow).dimmed()
    );
}

fn print_next(next_cursor: Option<&str>) {
    if let Some(cursor) = next_cursor {
        println!("{} --cursor {}", "more:".dimmed(), cursor);
    }
}

/// Draw lanes as text bars over the layout's time span.
fn render_lanes(layout: &LaneLayout<'_, Flow>, width: usize) -> Vec<String> {
    let width = width.max(1);
    let Some((min, max)) = layout.span() else {
        return Vec::new();
    };
    let total = (max - min).num_seconds().max(1);
    let column = |t: DateTime<Utc>| (((t - min).num_seconds() * width as i64) / total).clamp(0, width as i64) as usize;

    let mut lines = Vec::with_capacity(layout.lanes.len());
    for (i, lane) in layout.lanes.iter().enumerate() {
        let mut bar = vec!['.'; width];
        for flow in lane {
            let (Some(start), Some(end)) = (flow.start_time, flow.end_time) else {
                continue;
            };
            let from = column(start).min(width - 1);
            let to = column(end).max(from + 1).min(width);
            for cell in &mut bar[from..to] {
                *cell = '#';
            }
        }
        let titles: Vec<&str> = lane.iter().map(|f| f.title.as_str()).collect();
        lines.push(format!(
            "{:>3} |{}| {}",
            i + 1,
            bar.into_iter().collect::<String>(),
            titles.join(", ")
        ));
    }
    lines
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    let owner = cli.user.as_str();
    let open_store = || FlowStore::open(&config.database, config.store_timeout());
    let page_size = |limit: Option<usize>| limit.unwrap_or(config.default_page_limit).clamp(1, config.max_page_limit);

    match cli.command {
        Command::Init => {
            open_store().context("Failed to initialize database")?;
            println!("{} Initialized flow database at {}", "✓".green(), config.database.display());
        }

        Command::Save {
            title,
            id,
            description,
            category,
            start,
            end,
            expect_version,
        } => {
            let mut store = open_store()?;

            let category = match category {
                Some(name) => Some(Category::parse(&name).ok_or(ValidationError::UnknownCategory(name))?),
                None => None,
            };

            let id = id.unwrap_or_else(|| generate_flow_id(&title, Utc::now()));
            let draft = SaveFlow {
                id,
                title,
                description,
                category,
                start_time: start.as_deref().map(parse_time).transpose()?,
                end_time: end.as_deref().map(parse_time).transpose()?,
                ..Default::default()
            };

            let flow = store
                .save(owner, draft, expect_version)
                .context("Failed to save flow")?;
            println!(
                "{} Saved: {} {} (version {})",
                "✓".green(),
                flow.id.cyan(),
                flow.title,
                flow.version
            );
        }

        Command::Get { id, public } => {
            let store = open_store()?;
            let flow = if public { store.get_public(&id)? } else { store.get(owner, &id)? };

            match flow {
                Some(flow) => {
                    println!("{}: {}", "ID".bold(), flow.id.cyan());
                    println!("{}: {}", "Title".bold(), flow.title);
                    println!("{}: {}", "Owner".bold(), flow.owner_id);
                    println!("{}: {}", "Type".bold(), format_category(&flow));
                    if let Some(desc) = &flow.description {
                        println!("{}: {}", "Description".bold(), desc);
                    }
                    if let Some(start) = flow.start_time {
                        println!("{}: {}", "Start".bold(), start);
                    }
                    if let Some(end) = flow.end_time {
                        println!("{}: {}", "End".bold(), end);
                    }
                    println!(
                        "{}: {} nodes, {} edges",
                        "Graph".bold(),
                        flow.graph.nodes.len(),
                        flow.graph.edges.len()
                    );
                    println!("{}: {}", "Version".bold(), flow.version);
                    println!("{}: {}", "Created".bold(), flow.created_at);
                    println!("{}: {}", "Updated".bold(), flow.updated_at);
                }
                None => {
                    eprintln!("{} Flow not found: {}", "✗".red(), id);
                    std::process::exit(1);
                }
            }
        }

        Command::List { limit, cursor, all } => {
            let store = open_store()?;
            let limit = page_size(limit);

            let (flows, next) = if all {
                (store.collect_owned(owner, limit)?, None)
            } else {
                let request = match cursor {
                    Some(c) => PageRequest::after(limit, c),
                    None => PageRequest::first(limit),
                };
                let page = store.list_owned(owner, &request).context("Failed to list flows")?;
                (page.items, page.next_cursor)
            };

            if flows.is_empty() {
                println!("{}", "No flows found".dimmed());
            }
            for flow in &flows {
                print_flow_line(flow);
            }
            print_next(next.as_deref());
        }

        Command::Public { limit, cursor } => {
            let store = open_store()?;
            let limit = page_size(limit);
            let request = match cursor {
                Some(c) => PageRequest::after(limit, c),
                None => PageRequest::first(limit),
            };
            let page = store.list_public(&request).context("Failed to list flows")?;

            if page.items.is_empty() {
                println!("{}", "No flows found".dimmed());
            }
            for flow in &page.items {
                print_flow_line(flow);
            }
            print_next(page.next_cursor.as_deref());
        }

        Command::Delete { id } => {
            let mut store = open_store()?;
            if store.delete(owner, &id).context("Failed to delete flow")? {
                println!("{} Deleted: {}", "✓".green(), id.cyan());
            } else {
                eprintln!("{} Flow not found: {}", "✗".red(), id);
                std::process::exit(1);
            }
        }

        Command::Timeline { public, width } => {
            let store = open_store()?;
            let flows = if public {
                store.collect_public(config.max_page_limit)?
            } else {
                store.collect_owned(owner, config.max_page_limit)?
            };

            let layout = assign_lanes(&flows);
            if let Some((min, max)) = layout.span() {
                println!(
                    "{} {} lane(s), {} .. {}",
                    "→".blue(),
                    layout.lane_count(),
                    min.format("%Y-%m-%d %H:%M"),
                    max.format("%Y-%m-%d %H:%M")
                );
            } else {
                println!("{}", "No dated flows".dimmed());
            }
            for line in render_lanes(&layout, width) {
                println!("{}", line);
            }
            for flow in &layout.undated {
                println!("  {} {} {}", "undated".dimmed(), flow.id.cyan(), flow.title);
            }
            for rejected in &layout.rejected {
                println!("  {} {} {}", "skipped".red(), rejected.event.id.cyan(), rejected.error);
            }
        }

        Command::Serve => {
            println!("{} Starting server on {}", "→".blue(), config.listen);

            let server = Server::new(&config).context("Failed to create server")?;
            let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
            rt.block_on(server.run()).context("Server error")?;
        }

        Command::ServerStatus => {
            if is_server_running(&config.pid_path()) {
                println!("{} Server is running on {}", "✓".green(), config.listen);
            } else {
                println!("{} Server is not running", "✗".red());
            }
        }

        Command::ServerStop => {
            let pid_path = config.pid_path();
            if !is_server_running(&pid_path) {
                println!("{} Server is not running", "✗".red());
                std::process::exit(1);
            }

            stop_server(&pid_path).context("Failed to stop server")?;
            println!("{} Server stopping", "✓".green());
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
