use crate::infra::{JsonFileStore, LogEventPublisher, MemoryFileStorage};
use chrono::{Duration, Local, NaiveDate};
use citizen_workflow::config::AppConfig;
use citizen_workflow::error::AppError;
use citizen_workflow::workflows::applications::{
    ActionEntry, Application, CorrigendumRequest, FieldEdits, FormDetails, FormField,
    JsonServiceCatalog, NewUpload, Officer, OfficerAction, ReferenceNumber, ServiceId,
    Submission, TransitionRequest, WithheldType, Workflow, WorkflowService,
};
use citizen_workflow::workflows::location::{AccessLevel, CsvLocationDirectory, LocationResolver};
use clap::Args;
use std::sync::Arc;

const DISTRICTS: &str = "district_id,name,short_code,division
1,Jammu,JMU,1
5,Srinagar,SGR,2
7,Anantnag,ANT,2
";

const TEHSILS: &str = "tehsil_id,district_id,name
101,1,Jammu North
501,5,Srinagar North
502,5,Srinagar South
701,7,Anantnag
";

const SERVICES: &str = r#"[
    {
        "serviceId": 3,
        "name": "Disability Pension",
        "shortCode": "DPS",
        "officers": [
            { "designation": "Naib Tehsildar", "accessLevel": "Tehsil" },
            { "designation": "Tehsil Social Welfare Officer", "accessLevel": "Tehsil", "canPull": true },
            { "designation": "District Social Welfare Officer", "accessLevel": "District" }
        ],
        "corrigendumFields": ["UdidCard", "BankAccount"],
        "expiringCredentialField": "UdidValidUpto"
    }
]"#;

const DISABILITY_PENSION: ServiceId = ServiceId(3);

type DemoService = WorkflowService<JsonFileStore, LogEventPublisher>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Date used for renewal checks (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) as_of: Option<NaiveDate>,
    /// Skip the corrigendum portion of the demo.
    #[arg(long)]
    pub(crate) skip_corrigendum: bool,
}

pub(crate) fn run_demo(args: DemoArgs, config: &AppConfig) -> Result<(), AppError> {
    let DemoArgs {
        as_of,
        skip_corrigendum,
    } = args;
    let as_of = as_of.unwrap_or_else(|| Local::now().date_naive());

    let files = Arc::new(MemoryFileStorage::default());
    let service = demo_service(config, files.clone())?;

    println!("Citizen services workflow demo");
    let application = service.submit(pension_submission(as_of))?;
    let reference = application.reference_number.clone();
    println!(
        "\nSubmitted {} ({})",
        application.display_reference, application.reference_number
    );
    render_chain(&application.workflow);

    let naib = |code| Officer::new("Naib Tehsildar", AccessLevel::Tehsil, code);
    let tswo = |code| Officer::new("Tehsil Social Welfare Officer", AccessLevel::Tehsil, code);
    let dswo = |code| Officer::new("District Social Welfare Officer", AccessLevel::District, code);

    println!("\nNaib Tehsildar forwards");
    let application = act(&service, &reference, naib(501), OfficerAction::Forward)?;
    render_chain(&application.workflow);

    println!("\nTehsil Social Welfare Officer returns it");
    let application = act(&service, &reference, tswo(501), OfficerAction::Return)?;
    render_chain(&application.workflow);

    act(&service, &reference, naib(501), OfficerAction::Forward)?;
    act(&service, &reference, tswo(501), OfficerAction::Forward)?;
    println!("\nDistrict Social Welfare Officer sends it back to the citizen");
    let application = act(&service, &reference, dswo(5), OfficerAction::ReturnToCitizen)?;
    println!("  status: {}", application.status.label());

    println!("\nCitizen moves to Anantnag and resubmits");
    let relocation = FieldEdits::new(vec!["District".to_string(), "Tehsil".to_string()])
        .value("District", "7")
        .value("Tehsil", "701");
    let application = service.resubmit(&reference, relocation)?;
    render_chain(&application.workflow);

    println!("\nAnantnag District Social Welfare Officer forwards at the end of the chain");
    let application = act(&service, &reference, dswo(7), OfficerAction::Forward)?;
    println!("  status: {}", application.status.label());
    render_status(&service, &reference, as_of)?;

    if !skip_corrigendum {
        println!("\nCitizen requests a UDID correction");
        let edits = FieldEdits::new(vec!["UdidCard".to_string()]).value("UdidCard", "JK0799999");
        let corrigendum = service.open_corrigendum(
            &reference,
            CorrigendumRequest::new(edits, "card reissued after relocation"),
        )?;
        println!(
            "  corrigendum {} ({})",
            corrigendum.display_reference, corrigendum.corrigendum_id
        );
        for (name, field) in &corrigendum.corrigendum_fields {
            println!("  {name}: '{}' -> '{}'", field.old_value, field.new_value);
        }
        render_chain(&corrigendum.workflow);
        render_status(&service, &reference, as_of)?;

        let id = corrigendum.corrigendum_id;
        for (officer, action) in [
            (naib(701), OfficerAction::Forward),
            (tswo(701), OfficerAction::Forward),
            (dswo(7), OfficerAction::Sanction),
        ] {
            service.act_on_corrigendum(&id, TransitionRequest::new(officer, action))?;
        }
        let corrigendum = service.corrigendum(&id)?;
        println!("  corrigendum status: {}", corrigendum.status.label());
    }

    println!("\nA second application is withheld at the Naib Tehsildar's desk");
    let second = service.submit(pension_submission(as_of))?.reference_number;
    service.withhold(
        &second,
        &naib(501),
        WithheldType::Temporary,
        "awaiting medical board",
    )?;
    let inbox = service.pending_for(&naib(501), 10)?;
    println!("  inbox while withheld: {} application(s)", inbox.applications.len());
    service.release(&second, &naib(501), "board report received")?;
    let inbox = service.pending_for(&naib(501), 10)?;
    println!("  inbox after release: {} application(s)", inbox.applications.len());

    println!("\nHistory of {}", reference);
    render_history(&service.history(&reference)?);
    println!("\nStored documents: {}", files.len());

    Ok(())
}

fn demo_service(
    config: &AppConfig,
    files: Arc<MemoryFileStorage>,
) -> Result<DemoService, AppError> {
    let catalog = JsonServiceCatalog::from_reader(SERVICES.as_bytes())?;
    let directory = CsvLocationDirectory::from_readers(DISTRICTS.as_bytes(), TEHSILS.as_bytes())?;
    let locations = LocationResolver::new(Arc::new(directory), config.reference.state_name.clone());

    Ok(WorkflowService::new(
        Arc::new(JsonFileStore::ephemeral()),
        Arc::new(LogEventPublisher),
        Arc::new(catalog),
        files,
        locations,
        config.reference.portal_prefix.clone(),
    ))
}

fn pension_submission(as_of: NaiveDate) -> Submission {
    let valid_upto = (as_of + Duration::days(45)).format("%Y-%m-%d").to_string();
    let form = FormDetails::new()
        .with_section(
            "Location",
            vec![
                FormField::text("District", "5"),
                FormField::text("Tehsil", "501"),
            ],
        )
        .with_section("Applicant", vec![FormField::text("Name", "Ishfaq Ahmad")])
        .with_section(
            "Documents",
            vec![
                FormField::text("UdidCard", "JK0512345"),
                FormField::text("UdidValidUpto", valid_upto),
                FormField::text("BankAccount", "0011223344"),
            ],
        );

    Submission::new(DISABILITY_PENSION, form).upload(
        "UdidCard",
        NewUpload {
            file_name: "udid.pdf".to_string(),
            bytes: b"%PDF-1.4".to_vec(),
        },
    )
}

fn act(
    service: &DemoService,
    reference: &ReferenceNumber,
    officer: Officer,
    action: OfficerAction,
) -> Result<Application, AppError> {
    Ok(service.act(reference, TransitionRequest::new(officer, action))?)
}

fn render_chain(workflow: &Workflow) {
    for player in workflow.players() {
        let marker = if player.player_id == workflow.current_player() {
            '>'
        } else {
            ' '
        };
        let code = player
            .access_code
            .map_or_else(|| "-".to_string(), |code| code.to_string());
        let status = player.status.map_or("", |status| status.label());
        print!(
            "  {marker} [{}] {} @ {} {code}: {status}",
            player.player_id, player.designation, player.access_level
        );
        if player.shifted {
            print!(
                " (shifted {} -> {})",
                player.shifted_from.unwrap_or_default(),
                player.shifted_to.unwrap_or_default()
            );
        }
        println!();
    }
}

fn render_status(
    service: &DemoService,
    reference: &ReferenceNumber,
    as_of: NaiveDate,
) -> Result<(), AppError> {
    let view = service.status_view(reference, as_of)?;
    println!(
        "  status on {as_of}: {} with {} ({}), renewal due: {}",
        view.status.label(),
        view.current_officer.as_deref().unwrap_or("-"),
        view.current_area.as_deref().unwrap_or("-"),
        if view.renewal_due { "yes" } else { "no" }
    );
    Ok(())
}

fn render_history(entries: &[ActionEntry]) {
    for entry in entries {
        println!(
            "  {} {:<22} {}{}",
            entry.action_taken_date.format("%Y-%m-%d %H:%M"),
            entry.action_taken.label(),
            entry.action_taker,
            if entry.remarks.is_empty() {
                String::new()
            } else {
                format!(" ({})", entry.remarks)
            }
        );
    }
}
