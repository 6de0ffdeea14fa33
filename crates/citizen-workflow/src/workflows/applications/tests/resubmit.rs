use serde_json::json;

use super::common::*;
use crate::workflows::applications::domain::{
    ApplicationStatus, Officer, PlayerStatus, ReferenceNumber,
};
use crate::workflows::applications::error::WorkflowError;
use crate::workflows::applications::form::{
    FieldEdits, FileUpdate, FormDetails, FormError, FormField, NewUpload,
};
use crate::workflows::applications::history::ActionKind;
use crate::workflows::applications::repository::RepositoryError;
use crate::workflows::applications::service::{Submission, TransitionRequest};
use crate::workflows::applications::transition::{OfficerAction, TransitionError};
use crate::workflows::location::{AccessLevel, LocationError};

fn fields(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Submit, forward once, and have the tehsil welfare officer send it back to the citizen.
fn returned_from_tehsil(service: &TestService) -> ReferenceNumber {
    let reference = submit_pension(service).reference_number;
    act(service, &reference, naib_tehsildar(), OfficerAction::Forward);
    act(
        service,
        &reference,
        tehsil_welfare_officer(),
        OfficerAction::ReturnToCitizen,
    );
    reference
}

#[test]
fn district_change_rebinds_the_current_officer() {
    let (service, repository, _, _) = build_service();
    let reference = submit_pension(&service).reference_number;
    act(&service, &reference, naib_tehsildar(), OfficerAction::Forward);
    act(&service, &reference, tehsil_welfare_officer(), OfficerAction::Forward);
    let returned = act(
        &service,
        &reference,
        district_welfare_officer(),
        OfficerAction::ReturnToCitizen,
    );
    assert_eq!(returned.status, ApplicationStatus::Incomplete);

    let edits = FieldEdits::new(fields(&["District", "Tehsil"]))
        .value("District", "7")
        .value("Tehsil", "701");
    let application = service.resubmit(&reference, edits).expect("resubmit");

    assert_eq!(application.status, ApplicationStatus::Initiated);
    assert_eq!(application.workflow.current_player(), 2);
    let district_slot = &application.workflow.players()[2];
    assert!(district_slot.is_pending());
    assert!(district_slot.shifted);
    assert_eq!(district_slot.shifted_from, Some(5));
    assert_eq!(district_slot.shifted_to, Some(7));
    assert_eq!(district_slot.access_code, Some(7));

    for settled in &application.workflow.players()[..2] {
        assert_eq!(settled.access_code, Some(501));
        assert_eq!(settled.status, Some(PlayerStatus::Forwarded));
        assert!(!settled.shifted);
    }
    assert_eq!(repository.stored(&reference), application);

    let history = service.history(&reference).expect("history");
    let last = history.last().expect("resubmission recorded");
    assert_eq!(last.action_taken, ActionKind::Resubmitted);
    assert_eq!(last.location_level, Some(AccessLevel::Tehsil));
    assert_eq!(last.location_value, Some(701));

    let err = service
        .act(
            &reference,
            TransitionRequest::new(district_welfare_officer(), OfficerAction::Forward),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::IllegalTransition(TransitionError::OfficerMismatch { .. })
    ));

    let anantnag_officer =
        Officer::new("District Social Welfare Officer", AccessLevel::District, 7);
    let sanctioned = act(&service, &reference, anantnag_officer, OfficerAction::Sanction);
    assert_eq!(sanctioned.status, ApplicationStatus::Sanctioned);
}

#[test]
fn district_only_edit_moves_a_district_level_chain() {
    let (service, repository, _, _) = build_service();
    let form = FormDetails::new().with_section(
        "Location",
        vec![FormField::text("District", "5")],
    );
    let reference = service
        .submit(Submission::new(SENIOR_CITIZEN_CARD, form))
        .expect("submit")
        .reference_number;
    act(
        &service,
        &reference,
        district_welfare_officer(),
        OfficerAction::ReturnToCitizen,
    );

    let edits = FieldEdits::new(fields(&["District"])).value("District", "7");
    let application = service.resubmit(&reference, edits).expect("resubmit");

    let players = application.workflow.players();
    assert_eq!(application.workflow.current_player(), 0);
    assert!(players[0].shifted);
    assert_eq!(players[0].shifted_from, Some(5));
    assert_eq!(players[0].shifted_to, Some(7));
    assert_eq!(players[1].access_code, Some(2));
    assert!(!players[1].shifted);
    assert_eq!(repository.stored(&reference), application);

    let anantnag_officer =
        Officer::new("District Social Welfare Officer", AccessLevel::District, 7);
    act(&service, &reference, anantnag_officer, OfficerAction::Forward);
}

#[test]
fn district_only_edit_leaving_the_tehsil_behind_is_rejected() {
    let (service, repository, _, files) = build_service();
    let reference = returned_from_tehsil(&service);
    let before = repository.stored(&reference);

    let edits = FieldEdits::new(fields(&["District", "UdidCard"]))
        .value("District", "7")
        .file(
            "UdidCard",
            FileUpdate::Replace(NewUpload {
                file_name: "udid-renewed.pdf".to_string(),
                bytes: b"%PDF".to_vec(),
            }),
        );
    let err = service.resubmit(&reference, edits).unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::MalformedField(FormError::Location(LocationError::TehsilOutsideDistrict {
            tehsil: 501,
            district: 7
        }))
    ));
    assert_eq!(repository.stored(&reference), before);
    assert_eq!(files.len(), 2);

    let relocation = FieldEdits::new(fields(&["District", "Tehsil"]))
        .value("District", "7")
        .value("Tehsil", "701");
    let moved = service.resubmit(&reference, relocation).expect("consistent relocation");
    let players = moved.workflow.players();
    assert_eq!(players[1].shifted_to, Some(701));
    assert_eq!(players[2].access_code, Some(7));
}

#[test]
fn tehsil_change_shifts_only_the_slots_that_move() {
    let (service, _, _, _) = build_service();
    let reference = returned_from_tehsil(&service);

    let edits = FieldEdits::new(fields(&["Tehsil"])).value("Tehsil", "502");
    let application = service.resubmit(&reference, edits).expect("resubmit");

    let players = application.workflow.players();
    assert_eq!(application.workflow.current_player(), 1);
    assert_eq!(players[0].access_code, Some(501));
    assert!(players[1].shifted);
    assert_eq!(players[1].shifted_from, Some(501));
    assert_eq!(players[1].shifted_to, Some(502));
    assert_eq!(players[2].access_code, Some(5));
    assert!(!players[2].shifted);

    let relocated = Officer::new("Tehsil Social Welfare Officer", AccessLevel::Tehsil, 502);
    act(&service, &reference, relocated, OfficerAction::Forward);
}

#[test]
fn resubmission_touches_only_the_named_fields() {
    let (service, repository, _, _) = build_service();
    let reference = returned_from_tehsil(&service);
    let before = repository.stored(&reference).form_details;

    let edits = FieldEdits::new(fields(&["Phone"]))
        .value("Phone", "9906000000")
        .value("Name", "Someone Else");
    let after = service
        .resubmit(&reference, edits)
        .expect("resubmit")
        .form_details;

    for (section, fields) in after.sections() {
        for (position, field) in fields.iter().enumerate() {
            let original = &before.sections()[section][position];
            if field.name == "Phone" {
                assert_eq!(field.value, "9906000000");
            } else {
                assert_eq!(field, original, "{section}/{} changed", field.name);
            }
        }
    }
}

#[test]
fn file_updates_follow_the_three_way_convention() {
    let (service, repository, _, files) = build_service();
    let reference = returned_from_tehsil(&service);

    let edits: FieldEdits = serde_json::from_value(json!({
        "fields": ["UdidCard", "BankAccount", "UdidValidUpto"],
        "values": { "UdidCard": "JK0599999", "UdidValidUpto": "2031-06-30" },
        "files": {
            "UdidCard": { "fileName": "udid-renewed.pdf", "bytes": [37, 80, 68, 70] },
            "BankAccount": null,
            "UdidValidUpto": {}
        }
    }))
    .expect("edits parse");
    service.resubmit(&reference, edits).expect("resubmit");

    let form = repository.stored(&reference).form_details;
    let documents = &form.sections()["Documents"];
    let udid = documents.iter().find(|f| f.name == "UdidCard").expect("udid");
    assert_eq!(udid.value, "JK0599999");
    let replacement = udid.file.as_ref().expect("replacement stored");
    assert_eq!(replacement.0, "mem/1-udid-renewed.pdf");
    let bank = documents
        .iter()
        .find(|f| f.name == "BankAccount")
        .expect("bank account");
    assert_eq!(bank.value, "0011223344");
    assert!(bank.file.is_none());

    assert!(files.contains("mem/1-udid-renewed.pdf"));
    assert!(!files.contains(ORIGINAL_UDID));
    assert!(!files.contains(ORIGINAL_PASSBOOK));
    assert_eq!(files.len(), 1);
}

#[test]
fn only_applications_returned_to_the_citizen_accept_resubmission() {
    let (service, _, _, _) = build_service();
    let reference = submit_pension(&service).reference_number;

    let err = service
        .resubmit(&reference, FieldEdits::new(fields(&["Phone"])))
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::IllegalTransition(TransitionError::NotAwaitingCitizen)
    ));
}

#[test]
fn unknown_field_rejects_the_whole_edit() {
    let (service, repository, _, files) = build_service();
    let reference = returned_from_tehsil(&service);
    let before = repository.stored(&reference);

    let edits = FieldEdits::new(fields(&["Phone", "Nickname"]))
        .value("Phone", "9906000000")
        .file(
            "Phone",
            FileUpdate::Replace(NewUpload {
                file_name: "phone.pdf".to_string(),
                bytes: b"%PDF".to_vec(),
            }),
        );
    let err = service.resubmit(&reference, edits).unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::MalformedField(FormError::UnknownField(ref name)) if name == "Nickname"
    ));
    assert_eq!(repository.stored(&reference), before);
    assert_eq!(files.len(), 2);
}

#[test]
fn colliding_names_must_be_qualified_by_section() {
    let (service, repository, _, _) = build_service();
    let form = citizen_form().with_section(
        "Guardian",
        vec![FormField::text("Name", "Ghulam Nabi")],
    );
    let reference = service
        .submit(Submission::new(DISABILITY_PENSION, form))
        .expect("submit")
        .reference_number;
    act(&service, &reference, naib_tehsildar(), OfficerAction::ReturnToCitizen);

    let err = service
        .resubmit(
            &reference,
            FieldEdits::new(fields(&["Name"])).value("Name", "Ghulam Nabi Dar"),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::MalformedField(FormError::AmbiguousField { .. })
    ));

    service
        .resubmit(
            &reference,
            FieldEdits::new(fields(&["Guardian/Name"])).value("Guardian/Name", "Ghulam Nabi Dar"),
        )
        .expect("qualified edit");
    let form = repository.stored(&reference).form_details;
    assert_eq!(form.sections()["Guardian"][0].value, "Ghulam Nabi Dar");
    assert_eq!(
        form.sections()["Applicant"][0].value,
        "Ishfaq Ahmad",
        "the applicant's name is untouched"
    );
}

#[test]
fn failed_commit_discards_new_uploads_and_keeps_old_files() {
    let (service, repository, _, files) = build_service();
    let reference = returned_from_tehsil(&service);
    repository.fail_next_commit();

    let edits = FieldEdits::new(fields(&["UdidCard"])).file(
        "UdidCard",
        FileUpdate::Replace(NewUpload {
            file_name: "udid-renewed.pdf".to_string(),
            bytes: b"%PDF".to_vec(),
        }),
    );
    let err = service.resubmit(&reference, edits).unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::Repository(RepositoryError::Unavailable(_))
    ));
    assert!(!err.is_retryable());
    assert!(files.contains(ORIGINAL_UDID));
    assert!(!files.contains("mem/1-udid-renewed.pdf"));
    assert_eq!(files.len(), 2);
    assert_eq!(
        repository.stored(&reference).status,
        ApplicationStatus::Incomplete
    );
}
