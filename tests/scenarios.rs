use anyhow::Context;
use purchase_approval::{
    config::WorkflowConfig,
    directory::{InMemoryDirectory, Notifier, User},
    engine::Decision,
    error::{ErrorKind, WorkflowError},
    request::{EventType, ItemDraft, RequestDraft, TimeStamp},
    service::{Collaborators, PurchaseRequestService},
    status::{
        FINANCE_MANAGER, HEAD_OF_DEPARTMENT, PROCUREMENT_OFFICER, RequestStatus, STORES_OFFICER,
    },
    store::SledSequences,
};
use sled::open;
use std::sync::{Arc, Barrier, Mutex};

use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

const FINANCE: u64 = 1;
const IT: u64 = 2;
const MAIN_STATION: u64 = 100;
const OTHER_STATION: u64 = 200;

/// Keeps every message instead of sending it. Addresses listed in
/// `failing` return an error.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    failing: Vec<String>,
}

impl RecordingNotifier {
    fn addresses(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(address, _)| address.clone())
            .collect()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, address: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        if self.failing.iter().any(|a| a == address) {
            anyhow::bail!("mailbox {address} unavailable");
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), subject.to_string()));
        Ok(())
    }
}

fn user(id: u64, name: &str, role: &str, station: u64) -> User {
    User {
        id,
        first_name: name.to_string(),
        last_name: "Tester".to_string(),
        email: format!("{}@example.org", name.to_lowercase()),
        role: role.to_string(),
        department_ids: vec![FINANCE, IT],
        station_ids: vec![station],
    }
}

struct Fixture {
    service: PurchaseRequestService,
    notifier: Arc<RecordingNotifier>,
    clerk: User,
    hod: User,
    finance: User,
    procurement: User,
    stores: User,
    // dropped last so the database closes before its directory goes
    _temp_dir: TempDir,
}

fn fixture(name: &str, notifier: RecordingNotifier) -> anyhow::Result<Fixture> {
    // Sled uses file-based locking to prevent concurrent access. As in the
    // other suites each test gets its own database on temp for cleanup.
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join(format!("{name}.db")))?);

    let directory = Arc::new(InMemoryDirectory::new());
    directory.add_department(FINANCE, "Finance")?;
    directory.add_department(IT, "IT")?;

    let clerk = user(1, "Clerk", "CLERK", MAIN_STATION);
    let hod = user(2, "Hod", HEAD_OF_DEPARTMENT, MAIN_STATION);
    let finance = user(3, "Finance", FINANCE_MANAGER, MAIN_STATION);
    let procurement = user(4, "Procurement", PROCUREMENT_OFFICER, MAIN_STATION);
    let stores = user(5, "Stores", STORES_OFFICER, MAIN_STATION);
    let remote_finance = user(6, "Remote", FINANCE_MANAGER, OTHER_STATION);
    for u in [&clerk, &hod, &finance, &procurement, &stores, &remote_finance] {
        directory.add_user(u.clone())?;
    }

    let notifier = Arc::new(notifier);
    let collaborators = Collaborators {
        departments: directory.clone(),
        users: directory,
        codes: Arc::new(SledSequences::new(&db)?),
        notifier: notifier.clone(),
    };
    let service = PurchaseRequestService::new(db, collaborators, &WorkflowConfig::default())?;

    Ok(Fixture {
        service,
        notifier,
        clerk,
        hod,
        finance,
        procurement,
        stores,
        _temp_dir: temp_dir,
    })
}

fn draft(department: u64) -> RequestDraft {
    RequestDraft::new()
        .set_department(department)
        .set_reason("Replacement laptops for the audit team")
        .set_date(TimeStamp::new_with(2024, 6, 15, 0, 0, 0).unwrap())
        .add_item(
            ItemDraft::new("14 inch laptop", 3, 95_000)
                .set_number("1")
                .set_reference("QUOTE-778"),
        )
}

#[test]
fn create_then_fetch_round_trips() -> anyhow::Result<()> {
    let f = fixture("create_then_fetch", RecordingNotifier::default())?;

    let created = f
        .service
        .create(&f.clerk, "clerk-signature", draft(FINANCE))
        .context("Request Failed on Create: ")?;

    assert_eq!(created.code(), "PR-FIN-1");
    assert_eq!(created.status(), RequestStatus::Initiated);
    assert_eq!(created.approval_history().len(), 1);
    assert_eq!(created.approval_history()[0].status, RequestStatus::Initiated);
    assert_eq!(created.approval_history()[0].signature, "clerk-signature");
    assert_eq!(created.timeline().len(), 1);
    assert_eq!(created.timeline()[0].event_type, EventType::Created);

    let fetched = f.service.get(created.id())?;
    assert_eq!(fetched.items(), created.items());
    assert_eq!(fetched.reason(), created.reason());
    assert_eq!(fetched.date(), created.date());
    assert_eq!(fetched.code(), created.code());
    assert_eq!(fetched.approval_history(), created.approval_history());
    assert_eq!(fetched.timeline(), created.timeline());
    assert_eq!(fetched.items()[0].estimated_value, 285_000);

    // heads of department at the creator's station hear about it
    assert_eq!(f.notifier.addresses(), vec!["hod@example.org".to_string()]);

    Ok(())
}

#[test]
fn codes_are_sequenced_per_department() -> anyhow::Result<()> {
    let f = fixture("codes_per_department", RecordingNotifier::default())?;

    let first = f.service.create(&f.clerk, "s", draft(FINANCE))?;
    let second = f.service.create(&f.clerk, "s", draft(FINANCE))?;
    let it = f.service.create(&f.clerk, "s", draft(IT))?;

    assert_eq!(first.code(), "PR-FIN-1");
    assert_eq!(second.code(), "PR-FIN-2");
    assert_eq!(it.code(), "PR-IT-1");
    assert_eq!(
        f.service.find_by_code("PR-FIN-2")?.map(|r| r.id().to_string()),
        Some(second.id().to_string())
    );

    Ok(())
}

#[test]
fn approval_advances_and_notifies_next_stage() -> anyhow::Result<()> {
    let f = fixture("approve_once", RecordingNotifier::default())?;
    let created = f.service.create(&f.clerk, "s", draft(FINANCE))?;
    f.notifier.clear();

    let approved = f
        .service
        .decide(created.id(), &f.hod, &Decision::approve("hod-signature"))
        .context("Request Failed on Approval: ")?;

    assert_eq!(
        Some(approved.status()),
        RequestStatus::Initiated.next_on_approval()
    );
    assert_eq!(approved.approval_history().len(), 2);
    assert_eq!(
        approved.approval_history()[1].status,
        RequestStatus::HodApproved
    );
    assert_eq!(approved.approval_history()[1].user_id, f.hod.id);
    assert_eq!(approved.timeline().len(), 2);
    assert_eq!(approved.timeline()[1].event_type, EventType::Approved);
    assert!(approved.timeline()[1].description.contains("Hod Tester"));

    // the finance manager on another station is not told
    assert_eq!(
        f.notifier.addresses(),
        vec!["finance@example.org".to_string()]
    );

    Ok(())
}

#[test]
fn full_chain_reaches_received_and_stays_there() -> anyhow::Result<()> {
    let f = fixture("full_chain", RecordingNotifier::default())?;
    let created = f.service.create(&f.clerk, "s", draft(FINANCE))?;

    for approver in [&f.hod, &f.finance, &f.procurement, &f.stores] {
        f.service
            .decide(created.id(), approver, &Decision::approve("ok"))?;
    }

    let received = f.service.get(created.id())?;
    assert_eq!(received.status(), RequestStatus::Received);
    assert_eq!(received.approval_history().len(), 5);
    f.notifier.clear();

    for decision in [Decision::approve("again"), Decision::reject("too late")] {
        let err = f
            .service
            .decide(created.id(), &f.stores, &decision)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyReceived));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    assert_eq!(f.service.get(created.id())?, received);
    assert!(f.notifier.addresses().is_empty());
    f.service.verify_history(created.id())?;

    Ok(())
}

#[test]
fn rejection_is_terminal() -> anyhow::Result<()> {
    let f = fixture("rejection", RecordingNotifier::default())?;
    let created = f.service.create(&f.clerk, "s", draft(FINANCE))?;
    f.service
        .decide(created.id(), &f.hod, &Decision::approve("ok"))?;
    f.notifier.clear();

    let rejected = f
        .service
        .decide(created.id(), &f.finance, &Decision::reject("over budget"))?;
    assert_eq!(rejected.status(), RequestStatus::Rejected);
    assert_eq!(rejected.timeline().last().map(|e| e.event_type), Some(EventType::Rejected));
    assert!(f.notifier.addresses().is_empty());

    for decision in [Decision::approve("again"), Decision::reject("again")] {
        let err = f
            .service
            .decide(created.id(), &f.finance, &decision)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyRejected));
    }
    assert_eq!(f.service.get(created.id())?, rejected);

    Ok(())
}

#[test]
fn wrong_role_changes_nothing() -> anyhow::Result<()> {
    let f = fixture("wrong_role", RecordingNotifier::default())?;
    let created = f.service.create(&f.clerk, "s", draft(FINANCE))?;

    for decision in [Decision::approve("x"), Decision::reject("x")] {
        let err = f
            .service
            .decide(created.id(), &f.finance, &decision)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAuthorized);
    }

    assert_eq!(f.service.get(created.id())?, created);
    Ok(())
}

#[test]
fn concurrent_approvals_apply_once() -> anyhow::Result<()> {
    let f = fixture("concurrent", RecordingNotifier::default())?;
    let created = f.service.create(&f.clerk, "s", draft(FINANCE))?;
    let id = created.id().to_string();

    const CONTENDERS: usize = 6;
    let barrier = Barrier::new(CONTENDERS);
    let outcomes: Vec<Result<_, WorkflowError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..CONTENDERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    f.service.decide(&id, &f.hod, &Decision::approve("race"))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("approver thread panicked"))
            .collect()
    });

    let winners = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(winners, 1);
    for err in outcomes.into_iter().filter_map(Result::err) {
        assert!(
            matches!(err.kind(), ErrorKind::Conflict | ErrorKind::NotAuthorized),
            "unexpected loser error: {err}"
        );
    }

    let stored = f.service.get(&id)?;
    assert_eq!(stored.status(), RequestStatus::HodApproved);
    assert_eq!(stored.approval_history().len(), 2);
    assert_eq!(stored.timeline().len(), 2);

    Ok(())
}

#[test]
fn edit_replaces_contents_without_touching_status() -> anyhow::Result<()> {
    let f = fixture("edit", RecordingNotifier::default())?;
    let created = f.service.create(&f.clerk, "s", draft(FINANCE))?;
    f.notifier.clear();

    let changes = RequestDraft::new()
        .set_reason("Two laptops are enough")
        .set_date(TimeStamp::new_with(2024, 6, 20, 0, 0, 0).unwrap())
        .add_item(ItemDraft::new("14 inch laptop", 2, 95_000))
        .add_item(ItemDraft::new("Docking station", 2, 12_000));

    let edited = f.service.edit(&f.clerk, created.id(), changes)?;

    assert_eq!(edited.status(), RequestStatus::Initiated);
    assert_eq!(edited.department_id(), FINANCE);
    assert_eq!(edited.reason(), "Two laptops are enough");
    assert_eq!(edited.items().len(), 2);
    assert_eq!(edited.approval_history(), created.approval_history());
    assert_eq!(edited.timeline().len(), 2);
    assert_eq!(edited.timeline()[1].event_type, EventType::Edited);
    assert_eq!(edited.timeline()[1].user_id, Some(f.clerk.id));
    assert!(f.notifier.addresses().is_empty());

    // editing does not disturb the approval that follows
    let approved = f
        .service
        .decide(created.id(), &f.hod, &Decision::approve("ok"))?;
    assert_eq!(approved.status(), RequestStatus::HodApproved);
    assert_eq!(approved.timeline().len(), 3);

    Ok(())
}

#[test]
fn terminal_requests_cannot_be_edited() -> anyhow::Result<()> {
    let f = fixture("edit_terminal", RecordingNotifier::default())?;
    let created = f.service.create(&f.clerk, "s", draft(FINANCE))?;
    f.service
        .decide(created.id(), &f.hod, &Decision::reject("no"))?;

    let err = f
        .service
        .edit(&f.clerk, created.id(), draft(FINANCE))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyRejected));

    Ok(())
}

#[test]
fn lookups_fail_with_not_found() -> anyhow::Result<()> {
    let f = fixture("not_found", RecordingNotifier::default())?;

    let err = f.service.create(&f.clerk, "s", draft(99)).unwrap_err();
    assert!(matches!(err, WorkflowError::DepartmentNotFound(99)));

    let stranger = user(77, "Stranger", HEAD_OF_DEPARTMENT, MAIN_STATION);
    let err = f.service.create(&stranger, "s", draft(FINANCE)).unwrap_err();
    assert!(matches!(err, WorkflowError::UserNotFound(_)));

    let err = f
        .service
        .decide("pr_missing", &f.hod, &Decision::approve("x"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = f.service.get("pr_missing").unwrap_err();
    assert!(matches!(err, WorkflowError::RequestNotFound(_)));

    Ok(())
}

#[test]
fn empty_requests_are_rejected() -> anyhow::Result<()> {
    let f = fixture("empty_items", RecordingNotifier::default())?;
    let empty = RequestDraft::new()
        .set_department(FINANCE)
        .set_reason("nothing")
        .set_date(TimeStamp::new());

    let err = f.service.create(&f.clerk, "s", empty).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(f.service.list(0, 10)?.items.is_empty());

    Ok(())
}

#[test]
fn out_of_range_dates_fail_before_a_code_is_drawn() -> anyhow::Result<()> {
    let f = fixture("out_of_range_dates", RecordingNotifier::default())?;
    let far = TimeStamp::new_with(2300, 1, 1, 0, 0, 0).context("valid calendar date")?;

    let err = f
        .service
        .create(&f.clerk, "s", draft(FINANCE).set_date(far.clone()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = f
        .service
        .create(
            &f.clerk,
            "s",
            draft(FINANCE).add_item(ItemDraft::new("Spare battery", 1, 4_000).set_date(far)),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    // the refused attempts did not consume sequence numbers
    let created = f.service.create(&f.clerk, "s", draft(FINANCE))?;
    assert_eq!(created.code(), "PR-FIN-1");

    Ok(())
}

#[test]
fn notification_failures_do_not_roll_back() -> anyhow::Result<()> {
    let notifier = RecordingNotifier {
        failing: vec!["finance@example.org".to_string()],
        ..RecordingNotifier::default()
    };
    let f = fixture("notify_failure", notifier)?;
    let created = f.service.create(&f.clerk, "s", draft(FINANCE))?;

    let approved = f
        .service
        .decide(created.id(), &f.hod, &Decision::approve("ok"))?;

    assert_eq!(approved.status(), RequestStatus::HodApproved);
    assert_eq!(f.service.get(created.id())?.status(), RequestStatus::HodApproved);

    Ok(())
}

#[test]
fn list_pages_in_creation_order_and_delete() -> anyhow::Result<()> {
    let f = fixture("list_and_delete", RecordingNotifier::default())?;
    let mut codes = vec![];
    for _ in 0..5 {
        codes.push(f.service.create(&f.clerk, "s", draft(FINANCE))?.code().to_string());
    }

    let first = f.service.list(0, 2)?;
    let last = f.service.list(2, 2)?;
    assert_eq!(first.total, 5);
    assert_eq!(
        first.items.iter().map(|r| r.code()).collect::<Vec<_>>(),
        vec![codes[0].as_str(), codes[1].as_str()]
    );
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].code(), codes[4]);
    assert!(f.service.list(0, 0).is_err());

    let doomed = first.items[0].id().to_string();
    f.service.delete(&doomed)?;
    assert!(matches!(
        f.service.get(&doomed),
        Err(WorkflowError::RequestNotFound(_))
    ));
    assert!(f.service.find_by_code(&codes[0])?.is_none());
    assert_eq!(f.service.list(0, 10)?.total, 4);
    assert!(f.service.delete(&doomed).is_err());

    Ok(())
}

#[test]
fn history_and_timeline_read_in_insertion_order() -> anyhow::Result<()> {
    let f = fixture("read_order", RecordingNotifier::default())?;
    let created = f.service.create(&f.clerk, "s", draft(FINANCE))?;
    f.service
        .decide(created.id(), &f.hod, &Decision::approve("one"))?;
    f.service.edit(&f.clerk, created.id(), draft(FINANCE))?;
    f.service
        .decide(created.id(), &f.finance, &Decision::approve("two"))?;

    let history = f.service.history(created.id())?;
    let timeline = f.service.timeline(created.id())?;

    assert_eq!(
        history.iter().map(|e| e.seq).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(
        timeline.iter().map(|e| e.event_type).collect::<Vec<_>>(),
        vec![
            EventType::Created,
            EventType::Approved,
            EventType::Edited,
            EventType::Approved
        ]
    );
    assert!(timeline.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    Ok(())
}

#[test]
fn open_uses_configured_storage() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = WorkflowConfig::from_toml_str(&format!(
        "[storage]\npath = {:?}\n\n[codes]\nprefix = \"PUR\"\n",
        temp_dir.path().join("configured.db")
    ))?;
    config.validate()?;

    let directory = Arc::new(InMemoryDirectory::new());
    directory.add_department(FINANCE, "Finance")?;
    let clerk = user(1, "Clerk", "CLERK", MAIN_STATION);
    directory.add_user(clerk.clone())?;

    let service = PurchaseRequestService::open(
        &config,
        directory.clone(),
        directory,
        Arc::new(RecordingNotifier::default()),
    )?;
    let created = service.create(&clerk, "s", draft(FINANCE))?;

    assert_eq!(created.code(), "PUR-FIN-1");
    Ok(())
}
