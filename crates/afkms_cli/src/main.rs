//! `afkms`: command-line surface over the change engine.
//!
//! Output is JSON on stdout. Exit codes: 0 ok, 1 internal failure,
//! 2 validation failure, 3 nothing to undo, 4 not found.

use afkms_core::model::task::Topic;
use afkms_core::repo::task_repo::TaskRepo;
use afkms_core::repo::{new_id, now_ms};
use afkms_core::{
    init_logging, open_db, ActionInput, ActorKind, ActorRef, AuditListQuery, ChangeError,
    ChangeListQuery, ChangeService, ChangeStatus, CommitRequest, DryRunRequest, Settings,
    UndoOutcome, UndoRequest,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_VALIDATION: u8 = 2;
const EXIT_NOTHING_TO_UNDO: u8 = 3;
const EXIT_NOT_FOUND: u8 = 4;

#[derive(Parser)]
#[command(author, version, about = "AFKMS change engine CLI", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long, global = true, env = "AFKMS_DB_PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a batch of actions and store it as a proposed change set
    DryRun {
        #[arg(long, value_parser = parse_actor_kind, default_value = "agent")]
        actor_type: ActorKind,
        #[arg(long)]
        actor_id: String,
        #[arg(long)]
        tool: String,
        /// JSON array of `{type, payload}` objects; `-` reads stdin
        #[arg(long)]
        actions: String,
    },
    /// Apply a proposed change set
    Commit {
        change_set_id: String,
        #[arg(long, value_parser = parse_actor_kind, default_value = "user")]
        approver_type: ActorKind,
        #[arg(long)]
        approver_id: String,
        /// Idempotency key
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Revert the most recent committed change set
    UndoLast {
        #[arg(long, value_parser = parse_actor_kind, default_value = "user")]
        requester_type: ActorKind,
        #[arg(long)]
        requester_id: String,
        #[arg(long)]
        reason: String,
        /// Idempotency key
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Delete a proposed change set
    Reject { change_set_id: String },
    /// Show one change set with its actions and commit
    Show { change_set_id: String },
    /// List change sets, newest first
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<ChangeStatus>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
    /// List audit events, newest first
    Audit(AuditArgs),
    /// Create a topic (tasks, notes and ideas may reference it)
    SeedTopic { name: String },
}

#[derive(Args)]
struct AuditArgs {
    #[arg(long, value_parser = parse_actor_kind)]
    actor_type: Option<ActorKind>,
    #[arg(long)]
    actor_id: Option<String>,
    #[arg(long)]
    tool: Option<String>,
    #[arg(long)]
    action: Option<String>,
    #[arg(long)]
    target_type: Option<String>,
    #[arg(long)]
    target_id: Option<String>,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 50)]
    page_size: u32,
}

fn parse_actor_kind(value: &str) -> Result<ActorKind, String> {
    ActorKind::parse(value.trim()).ok_or_else(|| format!("unknown actor type `{value}`"))
}

fn parse_status(value: &str) -> Result<ChangeStatus, String> {
    ChangeStatus::parse(value.trim()).ok_or_else(|| format!("unknown change status `{value}`"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => report(&err),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    if let Err(err) = init_logging(&settings.log_level, &settings.log_dir) {
        eprintln!("warning: file logging disabled: {err}");
    }
    info!(
        "event=cli_start module=cli status=ok db_path={}",
        settings.db_path.display()
    );

    let mut conn = open_db(&settings.db_path)
        .with_context(|| format!("opening {}", settings.db_path.display()))?;

    match cli.command {
        Commands::DryRun {
            actor_type,
            actor_id,
            tool,
            actions,
        } => {
            let proposal = ChangeService::new(&mut conn).dry_run(DryRunRequest {
                actions: read_actions(&actions)?,
                actor: ActorRef::new(actor_type, actor_id),
                tool,
            })?;
            print_json(&json!({
                "change_set_id": proposal.change_set.id,
                "status": proposal.change_set.status,
                "summary": proposal.summary(),
                "diff": proposal.diff,
                "diff_items": proposal.diff_items(),
            }))?;
        }
        Commands::Commit {
            change_set_id,
            approver_type,
            approver_id,
            request_id,
        } => {
            let outcome = ChangeService::new(&mut conn).commit(
                &change_set_id,
                CommitRequest {
                    approved_by: ActorRef::new(approver_type, approver_id),
                    client_request_id: request_id,
                },
            )?;
            print_json(&json!({
                "commit_id": outcome.commit.id,
                "change_set_id": outcome.change_set.id,
                "status": outcome.change_set.status,
                "committed_at": outcome.commit.committed_at,
                "replayed": outcome.replayed,
            }))?;
        }
        Commands::UndoLast {
            requester_type,
            requester_id,
            reason,
            request_id,
        } => {
            let outcome = ChangeService::new(&mut conn).undo_last(UndoRequest {
                requested_by: ActorRef::new(requester_type, requester_id),
                reason,
                client_request_id: request_id,
            })?;
            print_json(&serde_json::to_value(&outcome)?)?;
            if outcome == UndoOutcome::NothingToUndo {
                return Ok(ExitCode::from(EXIT_NOTHING_TO_UNDO));
            }
        }
        Commands::Reject { change_set_id } => {
            let id = ChangeService::new(&mut conn).reject(&change_set_id)?;
            print_json(&json!({"change_set_id": id, "status": "rejected"}))?;
        }
        Commands::Show { change_set_id } => match ChangeService::new(&mut conn).get_change(&change_set_id)? {
            Some(detail) => print_json(&serde_json::to_value(&detail)?)?,
            None => {
                print_json(&json!({"error": "CHANGE_SET_NOT_FOUND", "change_set_id": change_set_id}))?;
                return Ok(ExitCode::from(EXIT_NOT_FOUND));
            }
        },
        Commands::List {
            status,
            page,
            page_size,
        } => {
            let result = ChangeService::new(&mut conn).list_changes(&ChangeListQuery {
                status,
                page,
                page_size,
            })?;
            print_json(&serde_json::to_value(&result)?)?;
        }
        Commands::Audit(args) => {
            let result = ChangeService::new(&mut conn).list_audit_events(&AuditListQuery {
                actor_type: args.actor_type,
                actor_id: args.actor_id,
                tool: args.tool,
                action: args.action,
                target_type: args.target_type,
                target_id: args.target_id,
                page: args.page,
                page_size: args.page_size,
            })?;
            print_json(&serde_json::to_value(&result)?)?;
        }
        Commands::SeedTopic { name } => {
            let topic = Topic {
                id: new_id("top"),
                name: name.trim().to_string(),
                created_at: now_ms(),
            };
            TaskRepo::new(&conn).insert_topic(&topic)?;
            print_json(&json!({"topic_id": topic.id, "name": topic.name}))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Reads a JSON action list from a file, or stdin for `-`.
fn read_actions(source: &str) -> Result<Vec<ActionInput>> {
    let text = if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("reading actions from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading actions from {source}"))?
    };
    let value: Value = serde_json::from_str(&text).context("actions are not valid JSON")?;
    let list = match value {
        Value::Object(mut wrapper) => wrapper.remove("actions").unwrap_or(Value::Null),
        other => other,
    };
    serde_json::from_value(list).context("expected an array of {type, payload} objects")
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report(err: &anyhow::Error) -> ExitCode {
    let Some(change_err) = err.downcast_ref::<ChangeError>() else {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    };
    let body = json!({"error": change_err.code(), "message": change_err.to_string()});
    eprintln!("{body}");
    match change_err {
        ChangeError::ChangeSetNotFound(_) => ExitCode::from(EXIT_NOT_FOUND),
        ChangeError::InvalidAction { .. }
        | ChangeError::Validation(_)
        | ChangeError::NotProposed { .. } => ExitCode::from(EXIT_VALIDATION),
        _ => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn commit_arguments_parse() {
        let cli = Cli::try_parse_from([
            "afkms",
            "commit",
            "chg_1",
            "--approver-id",
            "me",
            "--request-id",
            "R1",
        ])
        .unwrap();
        match cli.command {
            Commands::Commit {
                change_set_id,
                approver_type,
                request_id,
                ..
            } => {
                assert_eq!(change_set_id, "chg_1");
                assert_eq!(approver_type, ActorKind::User);
                assert_eq!(request_id.as_deref(), Some("R1"));
            }
            _ => panic!("expected commit"),
        }
    }

    #[test]
    fn unknown_actor_type_is_rejected() {
        assert!(parse_actor_kind("robot").is_err());
        assert_eq!(parse_status(" reverted ").unwrap(), ChangeStatus::Reverted);
    }
}
