//! Workspace migration into a live tenant.

mod common;

use tokio_util::sync::CancellationToken;

use common::{group, TestHarness, UserBuilder};
use portal_backup::archive::{ArchiveWriter, Scope};
use portal_backup::migration::{MigrationApiInfo, WorkspaceParser};
use portal_backup::progress::NoopProgress;
use portal_backup::memory::files::Share;
use portal_backup::services::{
    users::groups, Access, ActivationStatus, EmployeeType, EntryType, FileStorageService,
};

#[tokio::test]
async fn missing_avatar_is_only_a_warning() {
    let harness = TestHarness::new(1, "acme", false);
    let avatars = harness.path().join("avatars");
    std::fs::create_dir_all(&avatars).unwrap();
    std::fs::write(avatars.join("ann.png"), b"png-ann").unwrap();
    std::fs::write(avatars.join("bob.png"), b"png-bob").unwrap();

    let info = MigrationApiInfo {
        users: vec![
            UserBuilder::new("ann", "ann@ws.example")
                .avatar(avatars.join("ann.png"))
                .build(),
            UserBuilder::new("bob", "bob@ws.example")
                .user_type(EmployeeType::RoomAdmin)
                .avatar(avatars.join("bob.png"))
                .build(),
            UserBuilder::new("cid", "cid@ws.example")
                .avatar(avatars.join("cid.png"))
                .build(),
        ],
        groups: vec![group("g", "Team", &["ann", "bob", "cid"], Some("bob"))],
        ..Default::default()
    };

    let outcome = harness
        .migrator()
        .migrate(&info, &NoopProgress, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.successed_users, 3);
    assert_eq!(outcome.failed_users, 0);
    assert!(outcome.errors.is_empty());
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("cid@ws.example"));

    let users = harness.users.users();
    assert_eq!(users.len(), 3);
    assert!(users.iter().all(|u| u.activation == ActivationStatus::Pending));
    let cid = users.iter().find(|u| u.email == "cid@ws.example").unwrap();
    assert!(harness.users.photo(cid.id).is_none());
    let ann = users.iter().find(|u| u.email == "ann@ws.example").unwrap();
    assert_eq!(harness.users.photo(ann.id).as_deref(), Some(&b"png-ann"[..]));

    let team = harness
        .users
        .groups()
        .into_iter()
        .find(|g| g.name == "Team")
        .unwrap();
    let mut members = harness.users.group_members(team.id);
    members.sort();
    let mut expected: Vec<_> = users.iter().map(|u| u.id).collect();
    expected.sort();
    assert_eq!(members, expected);
    let bob = users.iter().find(|u| u.email == "bob@ws.example").unwrap();
    assert_eq!(team.manager, Some(bob.id));
    assert!(harness.users.group_members(groups::ROOM_ADMINS).contains(&bob.id));
}

#[tokio::test]
async fn partial_failures_are_counted_per_item() {
    let harness = TestHarness::new(1, "acme", false);
    let export = harness.path().join("export");
    std::fs::create_dir_all(&export).unwrap();
    harness.users.fail_saving("eve@ws.example");
    harness.files.fail_saving("broken.docx");

    let info = MigrationApiInfo {
        users: vec![
            UserBuilder::new("ann", "ann@ws.example")
                .folder(1, 0, "My documents", 0)
                .folder(2, 1, "Plans", 1)
                .file(&export, 10, 2, "broken.docx")
                .file(&export, 11, 2, "plan.docx")
                .build(),
            UserBuilder::new("eve", "eve@ws.example")
                .folder(3, 0, "My documents", 0)
                .file(&export, 12, 3, "eve.txt")
                .build(),
            UserBuilder::new("tom", "tom@ws.example")
                .folder(4, 0, "My documents", 0)
                .file(&export, 13, 4, "tom.txt")
                .build(),
        ],
        groups: vec![group("g", "Team", &["ann", "eve", "tom"], None)],
        ..Default::default()
    };

    let outcome = harness
        .migrator()
        .migrate(&info, &NoopProgress, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.successed_users, 2);
    assert_eq!(outcome.failed_users, 1);
    assert_eq!(
        outcome.successed_users + outcome.failed_users,
        info.users_to_import()
    );
    assert_eq!(outcome.errors.len(), 2);

    assert!(harness.files.file_by_title("plan.docx").is_some());
    assert!(harness.files.file_by_title("tom.txt").is_some());
    assert!(harness.files.file_by_title("eve.txt").is_none());
    assert!(harness.files.file_by_title("broken.docx").is_none());

    let team = harness
        .users
        .groups()
        .into_iter()
        .find(|g| g.name == "Team")
        .unwrap();
    assert_eq!(harness.users.group_members(team.id).len(), 2);
}

#[tokio::test]
async fn workspace_archive_is_imported() {
    let harness = TestHarness::new(5, "acme", false);
    let archive = harness.path().join("workspace.zip");
    ArchiveWriter::new(true)
        .write(
            harness.portal.as_ref(),
            Scope::Tenant(5),
            Some("acme"),
            &archive,
            &NoopProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let info = WorkspaceParser::new(harness.path().join("work"))
        .parse(&archive)
        .unwrap();
    let outcome = harness
        .migrator()
        .migrate(&info, &NoopProgress, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.successed_users, 1);
    assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);

    let owner = harness.users.users().remove(0);
    assert_eq!(owner.email, "owner@acme.example");
    let root = harness.files.user_root(owner.id).unwrap();
    let readme = harness.files.file_by_title("readme.txt").unwrap();
    assert_eq!(readme.folder_id, root);
    let q3 = harness.files.file_by_title("q3.docx").unwrap();
    assert_eq!(
        harness.files.read_file(q3.id).await.unwrap(),
        b"quarterly report".to_vec()
    );
    assert_eq!(harness.files.file_owner(q3.id), Some(owner.id));
    assert!(!harness.files.shares().is_empty());
}

#[tokio::test]
async fn shared_folder_content_lands_in_its_room() {
    let harness = TestHarness::new(1, "acme", false);
    let export = harness.path().join("export");
    std::fs::create_dir_all(&export).unwrap();

    let info = MigrationApiInfo {
        users: vec![
            UserBuilder::new("owner", "owner@ws.example")
                .folder(10, 0, "My documents", 0)
                .folder(11, 10, "Reports", 1)
                .folder(12, 11, "Archive", 2)
                .file(&export, 20, 11, "q3.docx")
                .file(&export, 21, 12, "q2.docx")
                .file(&export, 22, 10, "notes.txt")
                .share(11, EntryType::Folder, "reader", Access::Read)
                .build(),
            UserBuilder::new("reader", "reader@ws.example").build(),
        ],
        ..Default::default()
    };

    let outcome = harness
        .migrator()
        .migrate(&info, &NoopProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);

    let rooms: Vec<_> = harness.files.folders().into_iter().filter(|f| f.is_room).collect();
    assert_eq!(rooms.len(), 1);
    let room = &rooms[0];
    assert_eq!(room.title, "Reports");

    let q3 = harness.files.file_by_title("q3.docx").unwrap();
    assert_eq!(q3.folder_id, room.id);
    let archive = harness.files.folder_by_title("Archive").unwrap();
    assert_eq!(archive.parent_id, Some(room.id));
    assert_eq!(harness.files.file_by_title("q2.docx").unwrap().folder_id, archive.id);

    let users = harness.users.users();
    let owner = users.iter().find(|u| u.email == "owner@ws.example").unwrap();
    let reader = users.iter().find(|u| u.email == "reader@ws.example").unwrap();
    let root = harness.files.user_root(owner.id).unwrap();
    assert_eq!(harness.files.file_by_title("notes.txt").unwrap().folder_id, root);

    let granted: Vec<_> = harness
        .files
        .shares()
        .into_iter()
        .filter_map(|s| match s {
            Share::Ace { entry_id, grant, .. } if grant.subject == reader.id => Some(entry_id),
            _ => None,
        })
        .collect();
    assert_eq!(granted, vec![room.id]);
}
