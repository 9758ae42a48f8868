/// Operator commands typed on stdin while the tracker runs.
///
///   target <name...> [--exact]   track a creature (no name = auto-lock)
///   alias <key>                  track the creature an alias stands for, exactly
///   new                          fresh fight, same target setup
///   reset                        forget everything including the target
///   quit
///
/// Lines are split with shell quoting rules and parsed with clap, so
/// `target "Lich Lord" --exact` and `target Lich Lord --exact` both work.
use crate::{
    classifier::MatchMode,
    config::AppConfig,
    engine::TrackerHandle,
};
use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct Line {
    #[command(subcommand)]
    command: Console,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Console {
    Target {
        name: Vec<String>,
        #[arg(short, long)]
        exact: bool,
    },
    Alias {
        key: String,
    },
    New,
    Reset,
    #[command(alias = "exit")]
    Quit,
}

pub fn parse(line: &str) -> Result<Console, String> {
    let args = shlex::split(line).ok_or("error: Invalid quoting")?;
    Line::try_parse_from(args)
        .map(|l| l.command)
        .map_err(|e| e.to_string())
}

/// Apply one command. Returns true when the operator asked to quit.
pub async fn respond(line: &str, config: &AppConfig, handle: &TrackerHandle) -> Result<bool, String> {
    let send = |r: Result<()>| r.map_err(|e| e.to_string());

    match parse(line)? {
        Console::Target { name, exact } => {
            let name = config.resolve_alias(&name.join(" "));
            let mode = if exact { MatchMode::Exact } else { config.match_mode };
            send(handle.set_target(&name, mode).await)?;
        }
        Console::Alias { key } => {
            let Some((_, canonical)) = config.aliases.iter().find(|(k, _)| k.eq_ignore_ascii_case(&key)) else {
                return Err(format!("error: unknown alias '{key}'"));
            };
            send(handle.set_target(canonical, MatchMode::Exact).await)?;
        }
        Console::New   => send(handle.new_target().await)?,
        Console::Reset => send(handle.reset().await)?,
        Console::Quit  => return Ok(true),
    }
    Ok(false)
}

/// Reads stdin until `quit` (returns true) or end of input (returns false).
pub async fn run(config: AppConfig, handle: TrackerHandle) -> Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match respond(line, &config, &handle).await {
            Ok(true)  => return Ok(true),
            Ok(false) => {}
            Err(err)  => eprintln!("{err}"),
        }
    }
    tracing::info!("Console input closed");
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Command;
    use tokio::sync::mpsc;

    #[test]
    fn parses_target_forms() {
        assert_eq!(
            parse("target Lich Lord --exact").unwrap(),
            Console::Target { name: vec!["Lich".into(), "Lord".into()], exact: true }
        );
        assert_eq!(
            parse("target \"Lich Lord\"").unwrap(),
            Console::Target { name: vec!["Lich Lord".into()], exact: false }
        );
        assert_eq!(parse("target").unwrap(), Console::Target { name: vec![], exact: false });
        assert_eq!(parse("exit").unwrap(), Console::Quit);
        assert!(parse("target \"unclosed").is_err());
        assert!(parse("dance").is_err());
    }

    #[tokio::test]
    async fn respond_sends_engine_commands() {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = TrackerHandle::new(tx);
        let mut config = AppConfig::default();
        config.aliases.insert("lich".into(), "Lich Lord".into());

        assert!(!respond("target lich", &config, &handle).await.unwrap());
        assert_eq!(
            rx.recv().await.unwrap(),
            Command::SetTarget { name: "Lich Lord".into(), mode: MatchMode::Partial }
        );

        respond("alias LICH", &config, &handle).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            Command::SetTarget { name: "Lich Lord".into(), mode: MatchMode::Exact }
        );

        respond("new", &config, &handle).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Command::NewTarget);

        assert!(respond("alias nope", &config, &handle).await.is_err());
        assert!(respond("quit", &config, &handle).await.unwrap());
    }
}
