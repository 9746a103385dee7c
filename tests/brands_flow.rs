mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, expect_status, id_of, TestApp};
use serde_json::json;

#[tokio::test]
async fn share_link_exposes_brand_progress_and_takes_client_requests() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (admin_id, admin) = app.user_with_token("Root", "admin").await?;
    let (manager_id, manager) = app.user_with_token("Max", "manager").await?;
    let (employee_id, employee) = app.user_with_token("Eli", "employee").await?;

    let brand = app
        .post_json(
            "/api/brands",
            &json!({ "name": "Acme", "color": "#ff0000", "manager_ids": [manager_id] }),
            Some(&admin),
        )
        .await?;
    let brand = expect_status(brand, StatusCode::CREATED).await?;
    let brand_id = id_of(&brand)?;
    assert_eq!(brand["manager_ids"], json!([manager_id]));

    let brief = app
        .post_json(
            "/api/briefs",
            &json!({ "title": "Acme relaunch", "brand_id": brand_id }),
            Some(&manager),
        )
        .await?;
    let brief_id = id_of(&expect_status(brief, StatusCode::CREATED).await?)?;
    let task = app
        .post_json(
            &format!("/api/briefs/{brief_id}/tasks"),
            &json!({ "title": "Logo", "assignee_id": employee_id, "duration_minutes": 60 }),
            Some(&manager),
        )
        .await?;
    let task_id = id_of(&expect_status(task, StatusCode::CREATED).await?)?;

    let hidden = app
        .post_empty(&format!("/api/brands/{brand_id}/jsr-link"), Some(&employee))
        .await?;
    assert_eq!(hidden.status(), StatusCode::FORBIDDEN);

    let link = app
        .post_empty(&format!("/api/brands/{brand_id}/jsr-link"), Some(&manager))
        .await?;
    let link = expect_status(link, StatusCode::OK).await?;
    let link_id = id_of(&link)?;
    let token = link["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 24);
    assert_eq!(link["is_active"], true);

    let again = app
        .post_empty(&format!("/api/brands/{brand_id}/jsr-link"), Some(&admin))
        .await?;
    let again = expect_status(again, StatusCode::OK).await?;
    assert_eq!(again["token"], token.as_str());

    let view = expect_status(
        app.get(&format!("/api/public/jsr/{token}"), None).await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(view["brand"]["name"], "Acme");
    assert_eq!(view["briefs"].as_array().unwrap().len(), 0);

    let started = app
        .patch_json(
            &format!("/api/tasks/{task_id}/status"),
            &json!({ "status": "in-progress" }),
            Some(&employee),
        )
        .await?;
    assert_eq!(started.status(), StatusCode::OK);

    let view = expect_status(
        app.get(&format!("/api/public/jsr/{token}"), None).await?,
        StatusCode::OK,
    )
    .await?;
    let briefs = view["briefs"].as_array().unwrap();
    assert_eq!(briefs.len(), 1);
    let public_task = &briefs[0]["tasks"][0];
    assert_eq!(public_task["status"], "in-progress");
    assert!(public_task.get("assignee_id").is_none());
    assert_eq!(view["summary"]["in_progress"], 1);

    let request = app
        .post_json(
            &format!("/api/public/jsr/{token}/client-tasks"),
            &json!({ "title": "Social banners", "client_name": "Dana" }),
            None,
        )
        .await?;
    let request = expect_status(request, StatusCode::CREATED).await?;
    let request_id = id_of(&request)?;
    assert_eq!(request["status"], "pending_review");
    assert_eq!(app.notification_count(admin_id, "client_task_submitted").await?, 1);
    assert_eq!(app.notification_count(manager_id, "client_task_submitted").await?, 1);
    assert_eq!(app.notification_count(employee_id, "client_task_submitted").await?, 0);

    let accepted = app
        .patch_json(
            &format!("/api/client-tasks/{request_id}"),
            &json!({ "status": "accepted", "brief_id": brief_id }),
            Some(&manager),
        )
        .await?;
    let accepted = expect_status(accepted, StatusCode::OK).await?;
    assert_eq!(accepted["status"], "accepted");
    assert_eq!(accepted["brief_id"], brief_id.to_string());

    let listed = expect_status(
        app.get(&format!("/api/brands/{brand_id}/client-tasks"), Some(&manager)).await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let deactivated = app
        .post_empty(&format!("/api/jsr-links/{link_id}/deactivate"), Some(&manager))
        .await?;
    let deactivated = expect_status(deactivated, StatusCode::OK).await?;
    assert_eq!(deactivated["is_active"], false);

    let gone = expect_status(
        app.get(&format!("/api/public/jsr/{token}"), None).await?,
        StatusCode::OK,
    )
    .await?;
    assert!(gone.is_null());

    let refused = app
        .post_json(
            &format!("/api/public/jsr/{token}/client-tasks"),
            &json!({ "title": "Too late" }),
            None,
        )
        .await?;
    assert_eq!(refused.status(), StatusCode::NOT_FOUND);

    let current = expect_status(
        app.get(&format!("/api/brands/{brand_id}/jsr-link"), Some(&manager)).await?,
        StatusCode::OK,
    )
    .await?;
    assert!(current.is_null());

    let malformed = expect_status(
        app.get("/api/public/jsr/short", None).await?,
        StatusCode::OK,
    )
    .await?;
    assert!(malformed.is_null());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn brands_with_active_briefs_cannot_be_deleted() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, admin) = app.user_with_token("Root", "admin").await?;
    let (employee_id, _) = app.user_with_token("Eli", "employee").await?;

    let not_a_manager = app
        .post_json(
            "/api/brands",
            &json!({ "name": "Globex", "manager_ids": [employee_id] }),
            Some(&admin),
        )
        .await?;
    assert_eq!(not_a_manager.status(), StatusCode::BAD_REQUEST);

    let brand = app
        .post_json("/api/brands", &json!({ "name": "Globex" }), Some(&admin))
        .await?;
    let brand_id = id_of(&expect_status(brand, StatusCode::CREATED).await?)?;

    let brief = app
        .post_json(
            "/api/briefs",
            &json!({ "title": "Globex campaign", "brand_id": brand_id }),
            Some(&admin),
        )
        .await?;
    let brief_id = id_of(&expect_status(brief, StatusCode::CREATED).await?)?;

    let blocked = app.delete(&format!("/api/brands/{brand_id}"), Some(&admin)).await?;
    let body = expect_status(blocked, StatusCode::BAD_REQUEST).await?;
    assert_eq!(body["error"], "cannot delete brand with 1 active briefs");

    let archived = app
        .post_empty(&format!("/api/briefs/{brief_id}/archive"), Some(&admin))
        .await?;
    assert_eq!(archived.status(), StatusCode::OK);

    let brand = expect_status(
        app.get(&format!("/api/brands/{brand_id}"), Some(&admin)).await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(brand["active_brief_count"], 0);
    assert_eq!(brand["archived_brief_count"], 1);

    let deleted = app.delete(&format!("/api/brands/{brand_id}"), Some(&admin)).await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    app.cleanup().await?;
    Ok(())
}
