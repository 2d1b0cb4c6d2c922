//! End-to-end permission scenarios over the seeded roles.

mod common;

use common::{actions_at, expect, query, seconds, TestApp, TENANT, WORKSPACE};
use rbac_service::models::{
    CreatePermissionRequest, RequestStatus, ResourceType, ServiceTreeNode, Subject, SubjectType,
    TemplateType,
};

#[tokio::test]
async fn direct_grant_gives_exactly_the_role_actions() {
    let app = TestApp::spawn().await.expect("Failed to spawn test app");
    app.core
        .roles
        .assign_role_to_user(
            "alice",
            "viewer",
            ResourceType::Table,
            app.grant("/tenantA/shop/sales"),
        )
        .await
        .unwrap();

    let tree = vec![ServiceTreeNode::function(
        "/tenantA/shop/sales/orders",
        TemplateType::Table,
    )];
    let map = app.permissions(&query("alice"), &tree).await;

    assert_eq!(
        actions_at(&map, "/tenantA/shop/sales/orders"),
        expect(&[
            ("read", true),
            ("write", false),
            ("update", false),
            ("delete", false),
            ("admin", false),
        ])
    );
}

#[tokio::test]
async fn directory_admin_is_inherited_by_nested_form() {
    let app = TestApp::spawn().await.expect("Failed to spawn test app");
    app.core
        .roles
        .assign_role_to_user(
            "bob",
            "admin",
            ResourceType::Directory,
            app.grant("/tenantA/shop/ops"),
        )
        .await
        .unwrap();

    let tree = vec![ServiceTreeNode::package(
        "/tenantA/shop/ops/hr",
        vec![ServiceTreeNode::function(
            "/tenantA/shop/ops/hr/invoices",
            TemplateType::Form,
        )],
    )];
    let map = app.permissions(&query("bob"), &tree).await;

    assert_eq!(
        actions_at(&map, "/tenantA/shop/ops/hr/invoices"),
        expect(&[("read", true), ("write", true), ("admin", true)])
    );
}

#[tokio::test]
async fn directory_actions_translate_onto_tables() {
    let app = TestApp::spawn().await.expect("Failed to spawn test app");
    app.core
        .roles
        .assign_role_to_user(
            "carol",
            "developer",
            ResourceType::Directory,
            app.grant("/tenantA/shop"),
        )
        .await
        .unwrap();

    let tree = vec![ServiceTreeNode::function(
        "/tenantA/shop/x/t1",
        TemplateType::Table,
    )];
    let map = app.permissions(&query("carol"), &tree).await;

    assert_eq!(
        actions_at(&map, "/tenantA/shop/x/t1"),
        expect(&[
            ("read", true),
            ("write", true),
            ("update", true),
            ("delete", false),
            ("admin", false),
        ])
    );
}

#[tokio::test]
async fn department_chain_matches_parent_department() {
    let app = TestApp::spawn().await.expect("Failed to spawn test app");
    app.core
        .roles
        .assign_role_to_department(
            "/org/eng",
            "viewer",
            ResourceType::Form,
            app.grant("/tenantA/shop/forms"),
        )
        .await
        .unwrap();

    let tree = vec![ServiceTreeNode::function(
        "/tenantA/shop/forms/f1",
        TemplateType::Form,
    )];
    let dan = query("dan").with_department("/org/eng/payments");
    let map = app.permissions(&dan, &tree).await;

    assert_eq!(
        actions_at(&map, "/tenantA/shop/forms/f1"),
        expect(&[("read", true), ("write", false), ("admin", false)])
    );

    // Without the department the grant does not apply.
    let map = app.permissions(&query("dan"), &tree).await;
    assert!(actions_at(&map, "/tenantA/shop/forms/f1")
        .values()
        .all(|granted| !granted));
}

#[tokio::test]
async fn expired_assignment_grants_nothing() {
    let app = TestApp::spawn().await.expect("Failed to spawn test app");
    let now = app.now();
    app.core
        .roles
        .assign_role_to_user(
            "alice",
            "viewer",
            ResourceType::Table,
            app.windowed_grant("/tenantA/shop/sales", now - seconds(3600), Some(now - seconds(1))),
        )
        .await
        .unwrap();

    let tree = vec![ServiceTreeNode::function(
        "/tenantA/shop/sales/orders",
        TemplateType::Table,
    )];
    let map = app.permissions(&query("alice"), &tree).await;

    assert_eq!(
        actions_at(&map, "/tenantA/shop/sales/orders"),
        expect(&[
            ("read", false),
            ("write", false),
            ("update", false),
            ("delete", false),
            ("admin", false),
        ])
    );
}

#[tokio::test]
async fn approved_request_becomes_an_effective_assignment() {
    let app = TestApp::spawn().await.expect("Failed to spawn test app");
    app.tree.add_admin("/tenantA/shop/sales", "frank");
    let role_id = app.role_id(ResourceType::Table, "viewer").await;

    let opened = app
        .core
        .approvals
        .create_request(CreatePermissionRequest {
            tenant: TENANT.to_string(),
            workspace: WORKSPACE.to_string(),
            applicant: "eve".to_string(),
            subject: Subject::user("eve"),
            resource_path: "/tenantA/shop/sales".to_string(),
            role_id,
            start_time: None,
            end_time: None,
            reason: "quarterly report".to_string(),
        })
        .await
        .unwrap();
    assert!(opened.approvers.contains("frank"));

    let approved = app
        .core
        .approvals
        .approve(opened.request.id, "frank")
        .await
        .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some("frank"));
    let assignment_id = approved
        .role_assignment_id
        .expect("approval must link an assignment");

    let assignment = app
        .core
        .calculator
        .effective_assignment(assignment_id)
        .await
        .unwrap();
    assert_eq!(assignment.subject_type, SubjectType::User);
    assert_eq!(assignment.subject, "eve");
    assert_eq!(assignment.role_id, role_id);
    assert_eq!(assignment.resource_path, "/tenantA/shop/sales");

    let tree = vec![ServiceTreeNode::function(
        "/tenantA/shop/sales/orders",
        TemplateType::Table,
    )];
    let map = app.permissions(&query("eve"), &tree).await;
    assert_eq!(actions_at(&map, "/tenantA/shop/sales/orders")["read"], true);
    assert_eq!(actions_at(&map, "/tenantA/shop/sales/orders")["write"], false);
}
