use std::env;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use orchestrator::{
    access::Role,
    auth::password::{hash_password, MIN_PASSWORD_LENGTH},
    config::AppConfig,
    db,
    models::NewUser,
    schema::{notifications, users},
};

const USAGE: &str = "Usage:\n  maintenance create-admin <email> <name> <password>\n  maintenance prune-notifications <days>";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("create-admin") => match &args[1..] {
            [email, name, password] => create_admin(email, name, password),
            _ => usage(),
        },
        Some("prune-notifications") => match &args[1..] {
            [days] => {
                let days: i64 = days.parse().context("days must be an integer")?;
                prune_notifications(days)
            }
            _ => usage(),
        },
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => usage(),
    }
}

fn usage() -> Result<()> {
    eprintln!("{USAGE}");
    std::process::exit(1);
}

fn connect() -> Result<db::PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let applied = db::run_migrations(&pool)?;
    if applied > 0 {
        tracing::info!(applied, "database migrations applied");
    }
    Ok(pool)
}

fn create_admin(email: &str, name: &str, password: &str) -> Result<()> {
    let email = email.trim().to_lowercase();
    let name = name.trim().to_string();
    if !email.contains('@') {
        bail!("email must be a valid address");
    }
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        bail!("password must be at least {MIN_PASSWORD_LENGTH} characters");
    }

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let existing: Option<Uuid> = users::table
        .filter(users::email.eq(&email))
        .select(users::id)
        .first(&mut conn)
        .optional()
        .context("failed to look up user")?;

    if let Some(user_id) = existing {
        diesel::update(users::table.find(user_id))
            .set(users::role.eq(Role::Admin.as_str()))
            .execute(&mut conn)
            .context("failed to promote user")?;
        println!("Promoted existing user {email} ({user_id}) to admin.");
        return Ok(());
    }

    let user = NewUser {
        id: Uuid::new_v4(),
        name,
        email: email.clone(),
        password_hash: hash_password(password)?,
        role: Role::Admin.as_str().to_string(),
        designation: None,
    };
    diesel::insert_into(users::table)
        .values(&user)
        .execute(&mut conn)
        .context("failed to insert admin")?;
    println!("Created admin {email} ({}).", user.id);
    Ok(())
}

fn prune_notifications(days: i64) -> Result<()> {
    if days < 0 {
        bail!("days must not be negative");
    }
    let cutoff = Utc::now().naive_utc() - Duration::days(days);

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let removed = diesel::delete(
        notifications::table
            .filter(notifications::is_read.eq(true))
            .filter(notifications::created_at.lt(cutoff)),
    )
    .execute(&mut conn)
    .context("failed to prune notifications")?;

    println!("Removed {removed} read notifications older than {days} days.");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
