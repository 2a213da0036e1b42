use std::sync::Arc;

use tracing::{info, warn};

use roster::config::Config;
use roster::engine::Engine;
use roster::export::{SessionFileError, load_session, save_session};
use roster::model::*;
use roster::session::SessionManager;
use roster::sync::InMemorySync;

const USAGE: &str = "usage: roster <command>

commands:
  show                          print the roster table
  generate                      fill every date
  generate-date DATE            fill one date
  clear                         empty the roster
  conflicts                     list unavailable and double-booked slots
  add-role NAME                 add a single-slot role
  role-capacity NAME COUNT      make a role hold COUNT people (1 = single)
  add-date DATE [EVENT]         add a date row
  add-member NAME ROLE...       add a member holding the given roles
  unavailable DATE NAME         mark NAME unavailable on DATE
  assign DATE ROLE INDEX NAME   write NAME into one slot
  allow-duplicates on|off       allow one person in several roles per day";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        return Ok(());
    };

    let state = match load_session(&config.session_file) {
        Ok(state) => state,
        Err(SessionFileError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("no session at {}, starting fresh", config.session_file.display());
            TeamState {
                roles: default_roles(),
                ..Default::default()
            }
        }
        Err(e) => return Err(e.into()),
    };

    let sync = Arc::new(InMemorySync::new());
    let snapshot = state.into_snapshot();
    sync.insert_team(&config.team, snapshot.doc, snapshot.members);

    let manager = SessionManager::new(sync.clone()).with_seed(config.seed);
    let engine = manager.open(&config.team).await?;
    info!("team: {}", config.team);
    info!("  session_file: {}", config.session_file.display());
    info!("  seed: {}", config.seed.map_or("random".to_string(), |s| s.to_string()));

    let outcome = {
        let mut engine = engine.lock().await;
        run(&mut engine, command, &args[1..]).await
    };

    match tokio::time::timeout(config.flush_timeout, manager.close(&config.team)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("final save failed: {e}"),
        Err(_) => warn!("final save timed out after {:?}", config.flush_timeout),
    }

    let engine = engine.lock().await;
    save_session(&config.session_file, engine.state())?;
    outcome?;
    print!("{}", engine.table());
    Ok(())
}

fn positional(args: &[String], i: usize) -> Result<&str, Box<dyn std::error::Error>> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| format!("missing argument {}\n\n{USAGE}", i + 1).into())
}

async fn run(
    engine: &mut Engine,
    command: &str,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let arg = |i: usize| positional(args, i);

    match command {
        "show" => {}
        "generate" => {
            let generated = engine.generate_all()?;
            println!("filled {} slots, {} left open", generated.filled, generated.unfilled);
        }
        "generate-date" => {
            let generated = engine.generate_for_date(arg(0)?)?;
            println!("filled {} slots, {} left open", generated.filled, generated.unfilled);
        }
        "clear" => engine.clear_roster()?,
        "conflicts" => {
            let dates: Vec<DateKey> = engine.state().dates.iter().map(|d| d.date.clone()).collect();
            for date in dates {
                for conflict in engine.conflicts_on(&date) {
                    println!("{date} {} #{}: {:?}", conflict.role, conflict.index, conflict.warning);
                }
            }
        }
        "add-role" => engine.add_role(arg(0)?)?,
        "role-capacity" => {
            let count: u32 = arg(1)?.parse()?;
            engine.set_role_capacity(arg(0)?, count > 1, count)?;
        }
        "add-date" => {
            let event = args.get(1).map(String::as_str);
            let date = engine.add_date(arg(0)?, event)?;
            println!("added {date}");
        }
        "add-member" => {
            let roles: Vec<&str> = args.iter().skip(1).map(String::as_str).collect();
            let id = engine.add_member(Member::new(arg(0)?, &roles)).await?;
            println!("added member {id}");
        }
        "unavailable" => {
            engine.mark_unavailable(arg(0)?, arg(1)?)?;
        }
        "assign" => {
            let index: usize = arg(2)?.parse()?;
            for warning in engine.assign(arg(0)?, arg(1)?, index, arg(3)?)? {
                println!("warning: {warning:?}");
            }
        }
        "allow-duplicates" => engine.set_allow_duplicates(arg(0)? == "on")?,
        other => return Err(format!("unknown command: {other}\n\n{USAGE}").into()),
    }
    Ok(())
}
