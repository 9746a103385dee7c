mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, expect_status, id_of, TestApp};
use serde_json::json;

#[tokio::test]
async fn starting_a_timer_stops_the_running_one() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, employee) = app.user_with_token("Eli", "employee").await?;

    let idle = app.post_empty("/api/time-entries/stop", Some(&employee)).await?;
    assert_eq!(idle.status(), StatusCode::NOT_FOUND);

    let first = app
        .post_json("/api/time-entries/start", &json!({ "note": "research" }), Some(&employee))
        .await?;
    let first = expect_status(first, StatusCode::CREATED).await?;
    let first_id = id_of(&first["entry"])?;
    assert!(first["stopped"].is_null());
    assert!(first["entry"]["ended_at"].is_null());

    let second = app
        .post_json("/api/time-entries/start", &json!({}), Some(&employee))
        .await?;
    let second = expect_status(second, StatusCode::CREATED).await?;
    let second_id = id_of(&second["entry"])?;
    assert_eq!(id_of(&second["stopped"])?, first_id);
    assert!(second["stopped"]["ended_at"].is_string());

    let active = expect_status(
        app.get("/api/time-entries/active", Some(&employee)).await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(id_of(&active)?, second_id);

    let stopped = expect_status(
        app.post_empty("/api/time-entries/stop", Some(&employee)).await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(id_of(&stopped)?, second_id);
    assert_eq!(stopped["duration_minutes"], 0);

    let backwards = app
        .post_json(
            "/api/time-entries",
            &json!({
                "started_at": "2030-01-01T10:00:00Z",
                "ended_at": "2030-01-01T09:00:00Z",
            }),
            Some(&employee),
        )
        .await?;
    let body = expect_status(backwards, StatusCode::BAD_REQUEST).await?;
    assert_eq!(body["error"], "ended_at must be after started_at");

    let manual = app
        .post_json(
            "/api/time-entries",
            &json!({
                "started_at": "2030-01-01T09:00:00Z",
                "ended_at": "2030-01-01T10:30:00Z",
            }),
            Some(&employee),
        )
        .await?;
    let manual = expect_status(manual, StatusCode::CREATED).await?;
    assert_eq!(manual["duration_minutes"], 90);

    let entries = expect_status(
        app.get("/api/time-entries", Some(&employee)).await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(entries.as_array().unwrap().len(), 3);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn employees_cannot_read_other_timesheets() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (manager_id, manager) = app.user_with_token("Max", "manager").await?;
    let (employee_id, employee) = app.user_with_token("Eli", "employee").await?;

    let foreign = app
        .get(&format!("/api/time-entries?user_id={manager_id}"), Some(&employee))
        .await?;
    assert_eq!(foreign.status(), StatusCode::FORBIDDEN);

    let staff = app
        .get(&format!("/api/time-entries?user_id={employee_id}"), Some(&manager))
        .await?;
    assert_eq!(staff.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn templates_instantiate_into_briefs_with_tasks() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, manager) = app.user_with_token("Max", "manager").await?;
    let (employee_id, employee) = app.user_with_token("Eli", "employee").await?;

    let payload = json!({
        "name": "Product launch",
        "description": "Standard launch kit",
        "tasks": [
            { "title": "Press kit", "duration_minutes": 240 },
            { "title": "Landing page", "description": "Hero and pricing", "duration_minutes": 480 },
        ],
    });
    let refused = app.post_json("/api/templates", &payload, Some(&employee)).await?;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);

    let template = app.post_json("/api/templates", &payload, Some(&manager)).await?;
    let template = expect_status(template, StatusCode::CREATED).await?;
    let template_id = id_of(&template)?;
    assert_eq!(template["tasks"].as_array().unwrap().len(), 2);

    let brief = app
        .post_json(
            &format!("/api/templates/{template_id}/instantiate"),
            &json!({ "title": "Gizmo launch", "assignee_id": employee_id }),
            Some(&manager),
        )
        .await?;
    let brief = expect_status(brief, StatusCode::CREATED).await?;
    assert_eq!(brief["title"], "Gizmo launch");
    assert_eq!(brief["description"], "Standard launch kit");
    let tasks = brief["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["title"], "Press kit");
    assert_eq!(tasks[1]["sort_order"], 2000);
    assert_eq!(app.notification_count(employee_id, "task_assigned").await?, 2);

    let mine = expect_status(app.get("/api/tasks/mine", Some(&employee)).await?, StatusCode::OK).await?;
    assert_eq!(mine.as_array().unwrap().len(), 2);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn search_respects_brief_visibility() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, admin) = app.user_with_token("Root", "admin").await?;
    let (employee_id, employee) = app.user_with_token("Eli", "employee").await?;

    let visible = app
        .post_json("/api/briefs", &json!({ "title": "Winter promo" }), Some(&admin))
        .await?;
    let visible_id = id_of(&expect_status(visible, StatusCode::CREATED).await?)?;
    let task = app
        .post_json(
            &format!("/api/briefs/{visible_id}/tasks"),
            &json!({ "title": "Winter banner", "assignee_id": employee_id, "duration_minutes": 15 }),
            Some(&admin),
        )
        .await?;
    assert_eq!(task.status(), StatusCode::CREATED);
    let hidden = app
        .post_json("/api/briefs", &json!({ "title": "Winter payroll" }), Some(&admin))
        .await?;
    assert_eq!(hidden.status(), StatusCode::CREATED);

    let results = expect_status(
        app.get("/api/search?q=winter", Some(&admin)).await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(results["briefs"].as_array().unwrap().len(), 2);
    assert_eq!(results["tasks"].as_array().unwrap().len(), 1);

    let results = expect_status(
        app.get("/api/search?q=winter", Some(&employee)).await?,
        StatusCode::OK,
    )
    .await?;
    let briefs = results["briefs"].as_array().unwrap();
    assert_eq!(briefs.len(), 1);
    assert_eq!(id_of(&briefs[0])?, visible_id);

    let empty = expect_status(app.get("/api/search?q=", Some(&admin)).await?, StatusCode::OK).await?;
    assert!(empty["briefs"].as_array().unwrap().is_empty());

    app.cleanup().await?;
    Ok(())
}
