use crate::demo::{run_demo, DemoArgs};
use crate::infra::{open_service, parse_field_path, read_upload, CliService};
use chrono::{Local, NaiveDate};
use citizen_workflow::config::AppConfig;
use citizen_workflow::error::AppError;
use citizen_workflow::telemetry;
use citizen_workflow::workflows::applications::{
    CorrigendumId, CorrigendumRequest, FieldEdits, FileUpdate, FormDetails, Officer,
    OfficerAction, ReferenceNumber, ServiceId, Submission, TransitionRequest, WithheldType,
};
use citizen_workflow::workflows::location::AccessLevel;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "citizen-workflow",
    about = "Operate citizen service applications and their officer workflows",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a new application for a configured service
    Submit(SubmitArgs),
    /// Apply an officer action to an application
    Act(ActArgs),
    /// Resubmit an application returned to the citizen
    Resubmit(ResubmitArgs),
    /// Open, act on, or inspect corrigenda of sanctioned applications
    Corrigendum {
        #[command(subcommand)]
        command: CorrigendumCommand,
    },
    /// Withhold an application at the current officer's desk
    Hold(HoldArgs),
    /// Release a withheld application
    Release(ReleaseArgs),
    /// Print the action history of an application
    History(HistoryArgs),
    /// Print the citizen-facing status of an application
    Status(StatusArgs),
    /// List work waiting on an officer
    Inbox(InboxArgs),
    /// Walk through submission, returns, resubmission and corrigenda in memory
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum CorrigendumCommand {
    /// Request a correction to a sanctioned application
    Open(CorrigendumOpenArgs),
    /// Apply an officer action to a corrigendum
    Act(CorrigendumActArgs),
    /// Resubmit a corrigendum returned to the citizen
    Resubmit(CorrigendumResubmitArgs),
    /// Print one corrigendum
    Show(CorrigendumShowArgs),
    /// List every corrigendum raised against an application
    List(CorrigendumListArgs),
}

#[derive(Args, Debug, Clone)]
pub(crate) struct OfficerArgs {
    /// Officer designation as configured in the service chain
    #[arg(long)]
    pub(crate) designation: String,
    /// Access level of the officer's posting (Tehsil, District, Division, State)
    #[arg(long)]
    pub(crate) level: AccessLevel,
    /// Jurisdiction code of the posting (tehsil, district or division id; 0 for state)
    #[arg(long)]
    pub(crate) code: u32,
}

impl OfficerArgs {
    fn officer(&self) -> Officer {
        Officer::new(self.designation.clone(), self.level, self.code)
    }
}

#[derive(Args, Debug)]
struct EditArgs {
    /// JSON file with `fields`, `values` and optional `files` entries
    #[arg(long)]
    edits: PathBuf,
    /// Replace the document attached to a field (FIELD=PATH, repeatable)
    #[arg(long = "file", value_parser = parse_field_path)]
    files: Vec<(String, PathBuf)>,
    /// Remove the document attached to a field (repeatable)
    #[arg(long = "remove-file")]
    remove_files: Vec<String>,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    /// Numeric service id from the service catalog
    #[arg(long)]
    service: u32,
    /// JSON file holding the form sections
    #[arg(long)]
    form: PathBuf,
    /// Attach a document to a field (FIELD=PATH, repeatable)
    #[arg(long = "upload", value_parser = parse_field_path)]
    uploads: Vec<(String, PathBuf)>,
}

#[derive(Args, Debug)]
struct ActArgs {
    reference: String,
    #[command(flatten)]
    officer: OfficerArgs,
    /// forward, return, pull, sanction, reject or return-to-citizen
    #[arg(long)]
    action: OfficerAction,
    #[arg(long, default_value = "")]
    remarks: String,
}

#[derive(Args, Debug)]
struct ResubmitArgs {
    reference: String,
    #[command(flatten)]
    edits: EditArgs,
}

#[derive(Args, Debug)]
struct CorrigendumOpenArgs {
    reference: String,
    #[command(flatten)]
    edits: EditArgs,
    /// Citizen's reason for the correction
    #[arg(long, default_value = "")]
    remarks: String,
}

#[derive(Args, Debug)]
struct CorrigendumActArgs {
    corrigendum: String,
    #[command(flatten)]
    officer: OfficerArgs,
    #[arg(long)]
    action: OfficerAction,
    #[arg(long, default_value = "")]
    remarks: String,
}

#[derive(Args, Debug)]
struct CorrigendumResubmitArgs {
    corrigendum: String,
    #[command(flatten)]
    edits: EditArgs,
}

#[derive(Args, Debug)]
struct CorrigendumShowArgs {
    corrigendum: String,
}

#[derive(Args, Debug)]
struct CorrigendumListArgs {
    reference: String,
}

#[derive(Args, Debug)]
struct HoldArgs {
    reference: String,
    #[command(flatten)]
    officer: OfficerArgs,
    /// temporary or permanent
    #[arg(long, default_value = "temporary")]
    kind: WithheldType,
    #[arg(long, default_value = "")]
    reason: String,
}

#[derive(Args, Debug)]
struct ReleaseArgs {
    reference: String,
    #[command(flatten)]
    officer: OfficerArgs,
    #[arg(long, default_value = "")]
    remarks: String,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    reference: String,
    /// Include hold and release entries
    #[arg(long)]
    all: bool,
}

#[derive(Args, Debug)]
struct StatusArgs {
    reference: String,
    /// Date used for the renewal check (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    as_of: Option<NaiveDate>,
}

#[derive(Args, Debug)]
struct InboxArgs {
    #[command(flatten)]
    officer: OfficerArgs,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

pub(crate) fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let service = || open_service(&config);

    match cli.command {
        Command::Submit(args) => submit(&service()?, args),
        Command::Act(args) => {
            let request =
                TransitionRequest::new(args.officer.officer(), args.action).remarks(args.remarks);
            print_json(&service()?.act(&ReferenceNumber(args.reference), request)?)
        }
        Command::Resubmit(args) => {
            let edits = load_edits(&args.edits)?;
            print_json(&service()?.resubmit(&ReferenceNumber(args.reference), edits)?)
        }
        Command::Corrigendum { command } => corrigendum(&service()?, command),
        Command::Hold(args) => print_json(&service()?.withhold(
            &ReferenceNumber(args.reference),
            &args.officer.officer(),
            args.kind,
            args.reason,
        )?),
        Command::Release(args) => print_json(&service()?.release(
            &ReferenceNumber(args.reference),
            &args.officer.officer(),
            args.remarks,
        )?),
        Command::History(args) => {
            let service = service()?;
            let reference = ReferenceNumber(args.reference);
            let entries = if args.all {
                service.full_history(&reference)?
            } else {
                service.history(&reference)?
            };
            print_json(&entries)
        }
        Command::Status(args) => {
            let as_of = args.as_of.unwrap_or_else(|| Local::now().date_naive());
            print_json(&service()?.status_view(&ReferenceNumber(args.reference), as_of)?)
        }
        Command::Inbox(args) => {
            print_json(&service()?.pending_for(&args.officer.officer(), args.limit)?)
        }
        Command::Demo(args) => run_demo(args, &config),
    }
}

fn submit(service: &CliService, args: SubmitArgs) -> Result<(), AppError> {
    let form: FormDetails = serde_json::from_slice(&fs::read(&args.form)?)?;
    let mut submission = Submission::new(ServiceId(args.service), form);
    for (field, path) in &args.uploads {
        submission = submission.upload(field.clone(), read_upload(path)?);
    }
    print_json(&service.submit(submission)?)
}

fn corrigendum(service: &CliService, command: CorrigendumCommand) -> Result<(), AppError> {
    match command {
        CorrigendumCommand::Open(args) => {
            let request = CorrigendumRequest::new(load_edits(&args.edits)?, args.remarks);
            print_json(&service.open_corrigendum(&ReferenceNumber(args.reference), request)?)
        }
        CorrigendumCommand::Act(args) => {
            let request =
                TransitionRequest::new(args.officer.officer(), args.action).remarks(args.remarks);
            print_json(&service.act_on_corrigendum(&CorrigendumId(args.corrigendum), request)?)
        }
        CorrigendumCommand::Resubmit(args) => {
            let edits = load_edits(&args.edits)?;
            print_json(&service.resubmit_corrigendum(&CorrigendumId(args.corrigendum), edits)?)
        }
        CorrigendumCommand::Show(args) => {
            print_json(&service.corrigendum(&CorrigendumId(args.corrigendum))?)
        }
        CorrigendumCommand::List(args) => {
            print_json(&service.corrigenda(&ReferenceNumber(args.reference))?)
        }
    }
}

/// Read the edit document and apply file flags on top of it.
fn load_edits(args: &EditArgs) -> Result<FieldEdits, AppError> {
    let mut edits = read_edits(&args.edits)?;
    for (field, path) in &args.files {
        edits = edits.file(field.clone(), FileUpdate::Replace(read_upload(path)?));
    }
    for field in &args.remove_files {
        edits = edits.file(field.clone(), FileUpdate::Remove);
    }
    Ok(edits)
}

fn read_edits(path: &Path) -> Result<FieldEdits, AppError> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
