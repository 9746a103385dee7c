mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, expect_status, id_of, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn brief_moves_from_draft_to_review_through_a_deliverable() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (manager_id, manager) = app.user_with_token("Max", "manager").await?;
    let (employee_id, employee) = app.user_with_token("Eli", "employee").await?;

    let brief = app
        .post_json(
            "/api/briefs",
            &json!({ "title": "Autumn launch", "deadline": "2030-09-01T12:00:00Z" }),
            Some(&manager),
        )
        .await?;
    let brief = expect_status(brief, StatusCode::CREATED).await?;
    let brief_id = id_of(&brief)?;
    assert_eq!(brief["status"], "draft");
    assert_eq!(brief["assigned_manager_id"], manager_id.to_string());
    assert_eq!(brief["global_priority"], 1);

    let task = app
        .post_json(
            &format!("/api/briefs/{brief_id}/tasks"),
            &json!({ "title": "Hero banner", "assignee_id": employee_id, "duration_minutes": 120 }),
            Some(&manager),
        )
        .await?;
    let task = expect_status(task, StatusCode::CREATED).await?;
    let task_id = id_of(&task)?;
    assert_eq!(task["status"], "pending");
    assert_eq!(task["sort_order"], 1000);
    assert_eq!(app.notification_count(employee_id, "task_assigned").await?, 1);

    let started = app
        .patch_json(
            &format!("/api/tasks/{task_id}/status"),
            &json!({ "status": "in-progress" }),
            Some(&employee),
        )
        .await?;
    let started = expect_status(started, StatusCode::OK).await?;
    assert_eq!(started["brief_status"], "in-progress");
    assert_eq!(app.notification_count(manager_id, "task_status_changed").await?, 1);

    let done = app
        .patch_json(
            &format!("/api/tasks/{task_id}/status"),
            &json!({ "status": "done" }),
            Some(&employee),
        )
        .await?;
    let body = expect_status(done, StatusCode::FORBIDDEN).await?;
    assert_eq!(body["error"], "employees cannot mark tasks done");

    let submitted = app
        .post_json(
            &format!("/api/tasks/{task_id}/deliverables"),
            &json!({ "message": "First cut", "link": "https://drive.example/hero" }),
            Some(&employee),
        )
        .await?;
    let deliverable = expect_status(submitted, StatusCode::CREATED).await?;
    let deliverable_id = id_of(&deliverable)?;
    assert_eq!(deliverable["status"], "pending");
    assert_eq!(app.notification_count(manager_id, "deliverable_submitted").await?, 1);

    let current = expect_status(
        app.get(&format!("/api/tasks/{task_id}"), Some(&employee)).await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(current["status"], "review");

    let approved = app
        .post_json(
            &format!("/api/deliverables/{deliverable_id}/approve"),
            &json!({ "note": "Looks great" }),
            Some(&manager),
        )
        .await?;
    let review = expect_status(approved, StatusCode::OK).await?;
    assert_eq!(review["deliverable"]["status"], "approved");
    assert_eq!(review["task_status"], "done");
    assert_eq!(review["brief_status"], "review");
    assert_eq!(app.notification_count(employee_id, "deliverable_approved").await?, 1);

    let activity = expect_status(
        app.get(&format!("/api/briefs/{brief_id}/activity"), Some(&manager)).await?,
        StatusCode::OK,
    )
    .await?;
    let actions: Vec<&str> = activity
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|row| row["action"].as_str())
        .collect();
    assert_eq!(
        actions.iter().filter(|a| **a == "deliverable_approved").count(),
        1
    );
    assert!(actions.contains(&"brief_created"));
    assert!(actions.contains(&"task_created"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rejection_sends_the_task_back_to_in_progress() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, manager) = app.user_with_token("Max", "manager").await?;
    let (employee_id, employee) = app.user_with_token("Eli", "employee").await?;

    let brief = app
        .post_json("/api/briefs", &json!({ "title": "Retainer" }), Some(&manager))
        .await?;
    let brief_id = id_of(&expect_status(brief, StatusCode::CREATED).await?)?;
    let task = app
        .post_json(
            &format!("/api/briefs/{brief_id}/tasks"),
            &json!({ "title": "Copy", "assignee_id": employee_id, "duration_minutes": 30 }),
            Some(&manager),
        )
        .await?;
    let task_id = id_of(&expect_status(task, StatusCode::CREATED).await?)?;

    let empty = app
        .post_json(&format!("/api/tasks/{task_id}/deliverables"), &json!({}), Some(&employee))
        .await?;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let submitted = app
        .post_json(
            &format!("/api/tasks/{task_id}/deliverables"),
            &json!({ "message": "v1" }),
            Some(&employee),
        )
        .await?;
    let deliverable_id = id_of(&expect_status(submitted, StatusCode::CREATED).await?)?;

    let rejected = app
        .post_empty(&format!("/api/deliverables/{deliverable_id}/reject"), Some(&manager))
        .await?;
    let review = expect_status(rejected, StatusCode::OK).await?;
    assert_eq!(review["deliverable"]["status"], "rejected");
    assert_eq!(review["task_status"], "in-progress");
    assert_eq!(app.notification_count(employee_id, "deliverable_rejected").await?, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn archived_briefs_leave_the_board_and_refuse_new_work() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, admin) = app.user_with_token("Root", "admin").await?;
    let (employee_id, employee) = app.user_with_token("Eli", "employee").await?;

    let first = app
        .post_json("/api/briefs", &json!({ "title": "One" }), Some(&admin))
        .await?;
    let first_id = id_of(&expect_status(first, StatusCode::CREATED).await?)?;
    let second = app
        .post_json("/api/briefs", &json!({ "title": "Two" }), Some(&admin))
        .await?;
    let second = expect_status(second, StatusCode::CREATED).await?;
    let second_id = id_of(&second)?;
    assert_eq!(second["global_priority"], 2);

    let reordered = app
        .post_json(
            "/api/briefs/reorder",
            &json!({ "brief_ids": [second_id, first_id] }),
            Some(&admin),
        )
        .await?;
    assert_eq!(reordered.status(), StatusCode::NO_CONTENT);
    let board = expect_status(app.get("/api/briefs", Some(&admin)).await?, StatusCode::OK).await?;
    let order: Vec<String> = board
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(order, vec![second_id.to_string(), first_id.to_string()]);

    let employee_archive = app
        .post_empty(&format!("/api/briefs/{first_id}/archive"), Some(&employee))
        .await?;
    assert_eq!(employee_archive.status(), StatusCode::FORBIDDEN);

    let archived = app
        .post_empty(&format!("/api/briefs/{first_id}/archive"), Some(&admin))
        .await?;
    let archived = expect_status(archived, StatusCode::OK).await?;
    assert_eq!(archived["status"], "archived");
    assert!(archived["archived_at"].is_string());

    let board = expect_status(app.get("/api/briefs", Some(&admin)).await?, StatusCode::OK).await?;
    assert_eq!(board.as_array().unwrap().len(), 1);
    let archive = expect_status(
        app.get("/api/briefs/archived", Some(&admin)).await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(archive.as_array().unwrap().len(), 1);

    let blocked = app
        .post_json(
            &format!("/api/briefs/{first_id}/tasks"),
            &json!({ "title": "Late", "assignee_id": employee_id, "duration_minutes": 10 }),
            Some(&admin),
        )
        .await?;
    let body = expect_status(blocked, StatusCode::BAD_REQUEST).await?;
    assert_eq!(body["error"], "brief is archived");

    let restored = app
        .post_empty(&format!("/api/briefs/{first_id}/restore"), Some(&admin))
        .await?;
    let restored = expect_status(restored, StatusCode::OK).await?;
    assert_eq!(restored["status"], "draft");
    assert!(restored["archived_at"].is_null());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn dependency_cycles_are_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (admin_id, admin) = app.user_with_token("Root", "admin").await?;
    let brief = app
        .post_json("/api/briefs", &json!({ "title": "Graph" }), Some(&admin))
        .await?;
    let brief_id = id_of(&expect_status(brief, StatusCode::CREATED).await?)?;

    let mut ids = Vec::new();
    for title in ["A", "B"] {
        let task = app
            .post_json(
                &format!("/api/briefs/{brief_id}/tasks"),
                &json!({ "title": title, "assignee_id": admin_id, "duration_minutes": 5 }),
                Some(&admin),
            )
            .await?;
        ids.push(id_of(&expect_status(task, StatusCode::CREATED).await?)?);
    }

    let linked = app
        .put_json(
            &format!("/api/tasks/{}/dependencies", ids[1]),
            &json!({ "blocked_by": [ids[0]] }),
            Some(&admin),
        )
        .await?;
    let linked = expect_status(linked, StatusCode::OK).await?;
    assert_eq!(linked["blocked_by"], json!([ids[0]]));

    let cycle = app
        .put_json(
            &format!("/api/tasks/{}/dependencies", ids[0]),
            &json!({ "blocked_by": [ids[1]] }),
            Some(&admin),
        )
        .await?;
    assert_eq!(cycle.status(), StatusCode::BAD_REQUEST);

    let own = app
        .put_json(
            &format!("/api/tasks/{}/dependencies", ids[0]),
            &json!({ "blocked_by": [ids[0]] }),
            Some(&admin),
        )
        .await?;
    assert_eq!(own.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

async fn activity_actions(app: &TestApp, brief_id: Uuid, token: &str) -> Result<Vec<String>> {
    let activity = expect_status(
        app.get(&format!("/api/briefs/{brief_id}/activity"), Some(token)).await?,
        StatusCode::OK,
    )
    .await?;
    Ok(activity
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|row| row["action"].as_str().map(str::to_string))
        .collect())
}

#[tokio::test]
async fn assignee_cannot_reopen_a_done_task_by_submitting_work() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (manager_id, manager) = app.user_with_token("Max", "manager").await?;
    let (employee_id, employee) = app.user_with_token("Eli", "employee").await?;

    let brief = app
        .post_json("/api/briefs", &json!({ "title": "Wrapped up" }), Some(&manager))
        .await?;
    let brief_id = id_of(&expect_status(brief, StatusCode::CREATED).await?)?;
    let task = app
        .post_json(
            &format!("/api/briefs/{brief_id}/tasks"),
            &json!({ "title": "Final render", "assignee_id": employee_id, "duration_minutes": 60 }),
            Some(&manager),
        )
        .await?;
    let task_id = id_of(&expect_status(task, StatusCode::CREATED).await?)?;

    let done = app
        .patch_json(
            &format!("/api/tasks/{task_id}/status"),
            &json!({ "status": "done" }),
            Some(&manager),
        )
        .await?;
    let done = expect_status(done, StatusCode::OK).await?;
    assert_eq!(done["brief_status"], "review");

    let late = app
        .post_json(
            &format!("/api/tasks/{task_id}/deliverables"),
            &json!({ "message": "One more tweak" }),
            Some(&employee),
        )
        .await?;
    let body = expect_status(late, StatusCode::FORBIDDEN).await?;
    assert_eq!(body["error"], "completed tasks can only be reopened by a manager");

    let task = expect_status(
        app.get(&format!("/api/tasks/{task_id}"), Some(&manager)).await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(task["status"], "done");
    let brief = expect_status(
        app.get(&format!("/api/briefs/{brief_id}"), Some(&manager)).await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(brief["status"], "review");

    let deliverables = expect_status(
        app.get(&format!("/api/tasks/{task_id}/deliverables"), Some(&employee)).await?,
        StatusCode::OK,
    )
    .await?;
    assert!(deliverables.as_array().unwrap().is_empty());
    assert_eq!(app.notification_count(manager_id, "deliverable_submitted").await?, 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn reassignment_and_manager_changes_notify_the_people_involved() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, admin) = app.user_with_token("Root", "admin").await?;
    let (manager_id, _) = app.user_with_token("Max", "manager").await?;
    let (first_id, _) = app.user_with_token("Eli", "employee").await?;
    let (second_id, _) = app.user_with_token("Ivy", "employee").await?;

    let brief = app
        .post_json("/api/briefs", &json!({ "title": "Rebrand" }), Some(&admin))
        .await?;
    let brief = expect_status(brief, StatusCode::CREATED).await?;
    let brief_id = id_of(&brief)?;
    assert!(brief["assigned_manager_id"].is_null());

    let task = app
        .post_json(
            &format!("/api/briefs/{brief_id}/tasks"),
            &json!({ "title": "Logo", "assignee_id": first_id, "duration_minutes": 45 }),
            Some(&admin),
        )
        .await?;
    let task_id = id_of(&expect_status(task, StatusCode::CREATED).await?)?;
    assert_eq!(app.notification_count(first_id, "task_assigned").await?, 1);

    let moved = app
        .patch_json(
            &format!("/api/tasks/{task_id}"),
            &json!({ "assignee_id": second_id }),
            Some(&admin),
        )
        .await?;
    let moved = expect_status(moved, StatusCode::OK).await?;
    assert_eq!(moved["assignee_id"], second_id.to_string());
    assert_eq!(app.notification_count(first_id, "task_unassigned").await?, 1);
    assert_eq!(app.notification_count(second_id, "task_assigned").await?, 1);
    assert_eq!(app.notification_count(second_id, "task_unassigned").await?, 0);

    let handed = app
        .patch_json(
            &format!("/api/briefs/{brief_id}"),
            &json!({ "assigned_manager_id": manager_id }),
            Some(&admin),
        )
        .await?;
    let handed = expect_status(handed, StatusCode::OK).await?;
    assert_eq!(handed["assigned_manager_id"], manager_id.to_string());
    assert_eq!(app.notification_count(manager_id, "brief_assigned").await?, 1);

    let unchanged = app
        .patch_json(
            &format!("/api/briefs/{brief_id}"),
            &json!({ "assigned_manager_id": manager_id }),
            Some(&admin),
        )
        .await?;
    expect_status(unchanged, StatusCode::OK).await?;
    assert_eq!(app.notification_count(manager_id, "brief_assigned").await?, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn comments_reach_the_manager_and_the_task_assignee() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (manager_id, manager) = app.user_with_token("Max", "manager").await?;
    let (employee_id, employee) = app.user_with_token("Eli", "employee").await?;
    let (_, admin) = app.user_with_token("Root", "admin").await?;

    let brief = app
        .post_json("/api/briefs", &json!({ "title": "Newsletter" }), Some(&manager))
        .await?;
    let brief_id = id_of(&expect_status(brief, StatusCode::CREATED).await?)?;
    let task = app
        .post_json(
            &format!("/api/briefs/{brief_id}/tasks"),
            &json!({ "title": "Header art", "assignee_id": employee_id, "duration_minutes": 30 }),
            Some(&manager),
        )
        .await?;
    let task_id = id_of(&expect_status(task, StatusCode::CREATED).await?)?;

    let on_brief = app
        .post_json(
            &format!("/api/briefs/{brief_id}/comments"),
            &json!({ "content": "Client wants it earlier" }),
            Some(&admin),
        )
        .await?;
    expect_status(on_brief, StatusCode::CREATED).await?;
    assert_eq!(app.notification_count(manager_id, "comment_added").await?, 1);
    assert_eq!(app.notification_count(employee_id, "comment_added").await?, 0);

    let on_task = app
        .post_json(
            &format!("/api/briefs/{brief_id}/comments"),
            &json!({ "content": "Use the new palette", "task_id": task_id }),
            Some(&admin),
        )
        .await?;
    expect_status(on_task, StatusCode::CREATED).await?;
    assert_eq!(app.notification_count(manager_id, "comment_added").await?, 2);
    assert_eq!(app.notification_count(employee_id, "comment_added").await?, 1);

    let own = app
        .post_json(
            &format!("/api/briefs/{brief_id}/comments"),
            &json!({ "content": "On it", "task_id": task_id }),
            Some(&employee),
        )
        .await?;
    expect_status(own, StatusCode::CREATED).await?;
    assert_eq!(app.notification_count(manager_id, "comment_added").await?, 3);
    assert_eq!(app.notification_count(employee_id, "comment_added").await?, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn approving_twice_keeps_the_task_done_and_notifies_again() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, manager) = app.user_with_token("Max", "manager").await?;
    let (employee_id, employee) = app.user_with_token("Eli", "employee").await?;

    let brief = app
        .post_json("/api/briefs", &json!({ "title": "Lookbook" }), Some(&manager))
        .await?;
    let brief_id = id_of(&expect_status(brief, StatusCode::CREATED).await?)?;
    let task = app
        .post_json(
            &format!("/api/briefs/{brief_id}/tasks"),
            &json!({ "title": "Cover", "assignee_id": employee_id, "duration_minutes": 90 }),
            Some(&manager),
        )
        .await?;
    let task_id = id_of(&expect_status(task, StatusCode::CREATED).await?)?;
    let submitted = app
        .post_json(
            &format!("/api/tasks/{task_id}/deliverables"),
            &json!({ "link": "https://drive.example/cover" }),
            Some(&employee),
        )
        .await?;
    let deliverable_id = id_of(&expect_status(submitted, StatusCode::CREATED).await?)?;

    for round in 1..=2 {
        let approved = app
            .post_empty(&format!("/api/deliverables/{deliverable_id}/approve"), Some(&manager))
            .await?;
        let review = expect_status(approved, StatusCode::OK).await?;
        assert_eq!(review["deliverable"]["status"], "approved");
        assert_eq!(review["task_status"], "done");
        assert_eq!(review["brief_status"], "review");
        assert_eq!(
            app.notification_count(employee_id, "deliverable_approved").await?,
            round
        );
    }

    let actions = activity_actions(&app, brief_id, &manager).await?;
    assert_eq!(
        actions.iter().filter(|a| *a == "deliverable_approved").count(),
        2
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn comment_edits_and_deletions_are_logged() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, manager) = app.user_with_token("Max", "manager").await?;

    let brief = app
        .post_json("/api/briefs", &json!({ "title": "Podcast" }), Some(&manager))
        .await?;
    let brief_id = id_of(&expect_status(brief, StatusCode::CREATED).await?)?;
    let comment = app
        .post_json(
            &format!("/api/briefs/{brief_id}/comments"),
            &json!({ "content": "Draft script" }),
            Some(&manager),
        )
        .await?;
    let comment_id = id_of(&expect_status(comment, StatusCode::CREATED).await?)?;

    let edited = app
        .patch_json(
            &format!("/api/comments/{comment_id}"),
            &json!({ "content": "Final script" }),
            Some(&manager),
        )
        .await?;
    let edited = expect_status(edited, StatusCode::OK).await?;
    assert_eq!(edited["content"], "Final script");
    assert_eq!(edited["author_name"], "Max");

    let removed = app
        .delete(&format!("/api/comments/{comment_id}"), Some(&manager))
        .await?;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);

    let activity = expect_status(
        app.get(&format!("/api/briefs/{brief_id}/activity"), Some(&manager)).await?,
        StatusCode::OK,
    )
    .await?;
    let rows = activity.as_array().unwrap();
    let actions: Vec<&str> = rows.iter().filter_map(|row| row["action"].as_str()).collect();
    assert_eq!(
        actions,
        vec!["comment_deleted", "comment_updated", "comment_added", "brief_created"]
    );
    assert_eq!(rows[1]["details"]["content"]["from"], "Draft script");
    assert_eq!(rows[1]["details"]["content"]["to"], "Final script");
    assert_eq!(rows[0]["details"]["comment_id"], comment_id.to_string());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn comments_outlive_their_author() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, admin) = app.user_with_token("Root", "admin").await?;
    let (employee_id, employee) = app.user_with_token("Eli", "employee").await?;

    let brief = app
        .post_json("/api/briefs", &json!({ "title": "Offboarding" }), Some(&admin))
        .await?;
    let brief_id = id_of(&expect_status(brief, StatusCode::CREATED).await?)?;
    let task = app
        .post_json(
            &format!("/api/briefs/{brief_id}/tasks"),
            &json!({ "title": "Handoff notes", "assignee_id": employee_id, "duration_minutes": 20 }),
            Some(&admin),
        )
        .await?;
    let task_id = id_of(&expect_status(task, StatusCode::CREATED).await?)?;
    let comment = app
        .post_json(
            &format!("/api/briefs/{brief_id}/comments"),
            &json!({ "content": "Notes are in the shared drive", "task_id": task_id }),
            Some(&employee),
        )
        .await?;
    let comment_id = id_of(&expect_status(comment, StatusCode::CREATED).await?)?;

    let deleted = app.delete(&format!("/api/users/{employee_id}"), Some(&admin)).await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let listed = expect_status(
        app.get(&format!("/api/briefs/{brief_id}/comments"), Some(&admin)).await?,
        StatusCode::OK,
    )
    .await?;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["author_id"], employee_id.to_string());
    assert!(listed[0]["author_name"].is_null());

    let edited = app
        .patch_json(
            &format!("/api/comments/{comment_id}"),
            &json!({ "content": "Notes moved to the wiki" }),
            Some(&admin),
        )
        .await?;
    let edited = expect_status(edited, StatusCode::OK).await?;
    assert_eq!(edited["content"], "Notes moved to the wiki");
    assert!(edited["author_name"].is_null());

    app.cleanup().await?;
    Ok(())
}
