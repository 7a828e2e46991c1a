//! Database layer: migrations and queries for users, sessions, projects and
//! contributions.

use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::info;

use crate::errors::Result;
use crate::models::{
    Contribution, ContributionDetail, ContributionStatus, ContributionType, Participant, Project,
    ProjectDetail, ProjectStatus, User,
};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true);

    // Every connection to `:memory:` opens its own database.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Users & sessions
// ─────────────────────────────────────────────────────────

pub async fn find_user(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Look a user up by wallet address. The address is matched lower-cased.
pub async fn find_user_by_address(pool: &SqlitePool, wallet_address: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE wallet_address = ?1")
        .bind(wallet_address.to_lowercase())
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Create the user if needed and replace its login nonce.
pub async fn upsert_user_nonce(pool: &SqlitePool, wallet_address: &str, nonce: &str) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (wallet_address, nonce)
        VALUES (?1, ?2)
        ON CONFLICT (wallet_address)
        DO UPDATE SET nonce = excluded.nonce, updated_at = ?3
        RETURNING *
        "#,
    )
    .bind(wallet_address.to_lowercase())
    .bind(nonce)
    .bind(now())
    .fetch_one(pool)
    .await?;
    Ok(user)
}

pub async fn clear_nonce(pool: &SqlitePool, user_id: i64) -> Result<()> {
    sqlx::query("UPDATE users SET nonce = NULL, updated_at = ?2 WHERE id = ?1")
        .bind(user_id)
        .bind(now())
        .execute(pool)
        .await?;
    Ok(())
}

/// Grant the admin flag to every listed wallet, creating users as needed.
pub async fn promote_admins(pool: &SqlitePool, wallet_addresses: &[String]) -> Result<usize> {
    let mut count = 0usize;
    for address in wallet_addresses {
        count += sqlx::query(
            r#"
            INSERT INTO users (wallet_address, is_admin)
            VALUES (?1, 1)
            ON CONFLICT (wallet_address) DO UPDATE SET is_admin = 1
            "#,
        )
        .bind(address.to_lowercase())
        .execute(pool)
        .await?
        .rows_affected() as usize;
    }
    Ok(count)
}

pub async fn create_session(pool: &SqlitePool, token: &str, user_id: i64, expires_at: i64) -> Result<()> {
    sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)")
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(())
}

/// Resolve a bearer token to its user. Expired sessions resolve to `None`.
pub async fn find_session_user(pool: &SqlitePool, token: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT u.*
        FROM   sessions s
        JOIN   users u ON u.id = s.user_id
        WHERE  s.token = ?1 AND s.expires_at > ?2
        "#,
    )
    .bind(token)
    .bind(now())
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

// ─────────────────────────────────────────────────────────
// Projects
// ─────────────────────────────────────────────────────────

pub async fn insert_project(
    pool: &SqlitePool,
    creator_id: i64,
    title: &str,
    description: &str,
) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        r#"
        INSERT INTO projects (creator_id, title, description, status)
        VALUES (?1, ?2, ?3, ?4)
        RETURNING *
        "#,
    )
    .bind(creator_id)
    .bind(title)
    .bind(description)
    .bind(ProjectStatus::Pending)
    .fetch_one(pool)
    .await?;
    Ok(project)
}

pub async fn get_project(pool: &SqlitePool, id: i64) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(project)
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    #[sqlx(flatten)]
    project: Project,
    creator_wallet_address: String,
    creator_username: Option<String>,
}

impl From<ProjectRow> for ProjectDetail {
    fn from(row: ProjectRow) -> Self {
        Self {
            creator: Participant {
                id: row.project.creator_id,
                wallet_address: row.creator_wallet_address,
                username: row.creator_username,
            },
            project: row.project,
        }
    }
}

const PROJECT_DETAIL: &str = r#"
    SELECT p.*,
           u.wallet_address AS creator_wallet_address,
           u.username       AS creator_username
    FROM   projects p
    JOIN   users u ON u.id = p.creator_id
"#;

/// A project joined with its creator.
pub async fn get_project_detail(pool: &SqlitePool, id: i64) -> Result<Option<ProjectDetail>> {
    let sql = format!("{PROJECT_DETAIL} WHERE p.id = ?1");
    let row = sqlx::query_as::<_, ProjectRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(ProjectDetail::from))
}

/// All projects with their creators, newest first.
pub async fn list_projects(pool: &SqlitePool) -> Result<Vec<ProjectDetail>> {
    let sql = format!("{PROJECT_DETAIL} ORDER BY p.created_at DESC, p.id DESC");
    let rows = sqlx::query_as::<_, ProjectRow>(&sql).fetch_all(pool).await?;
    Ok(rows.into_iter().map(ProjectDetail::from).collect())
}

/// Projects holding a proposal id whose status is still `pending`.
pub async fn list_minted_pending(pool: &SqlitePool) -> Result<Vec<Project>> {
    let rows = sqlx::query_as::<_, Project>(
        r#"
        SELECT * FROM projects
        WHERE  nft_token_id IS NOT NULL AND status = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(ProjectStatus::Pending)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn record_project_cid(pool: &SqlitePool, id: i64, ipfs_cid: &str) -> Result<()> {
    sqlx::query("UPDATE projects SET ipfs_cid = ?2, updated_at = ?3 WHERE id = ?1")
        .bind(id)
        .bind(ipfs_cid)
        .bind(now())
        .execute(pool)
        .await?;
    Ok(())
}

/// Store the proposal id of a freshly minted project. Returns `false` if the
/// project already had one.
pub async fn record_minted(
    pool: &SqlitePool,
    id: i64,
    nft_token_id: i64,
    contract_address: &str,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE projects
        SET    nft_token_id = ?2, contract_address = ?3, updated_at = ?4
        WHERE  id = ?1 AND nft_token_id IS NULL
        "#,
    )
    .bind(id)
    .bind(nft_token_id)
    .bind(contract_address)
    .bind(now())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

pub async fn update_project_status(pool: &SqlitePool, id: i64, status: ProjectStatus) -> Result<()> {
    sqlx::query("UPDATE projects SET status = ?2, updated_at = ?3 WHERE id = ?1")
        .bind(id)
        .bind(status)
        .bind(now())
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a project only while it is still `pending`.
pub async fn delete_pending_project(pool: &SqlitePool, id: i64) -> Result<bool> {
    let rows = sqlx::query("DELETE FROM projects WHERE id = ?1 AND status = ?2")
        .bind(id)
        .bind(ProjectStatus::Pending)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows == 1)
}

// ─────────────────────────────────────────────────────────
// Contributions
// ─────────────────────────────────────────────────────────

pub async fn insert_contribution(
    pool: &SqlitePool,
    contributor_id: i64,
    project_id: i64,
    contribution_type: ContributionType,
    description: &str,
    proof_url: Option<&str>,
) -> Result<Contribution> {
    let contribution = sqlx::query_as::<_, Contribution>(
        r#"
        INSERT INTO contributions
            (contributor_id, project_id, contribution_type, description, proof_url, status)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        RETURNING *
        "#,
    )
    .bind(contributor_id)
    .bind(project_id)
    .bind(contribution_type)
    .bind(description)
    .bind(proof_url)
    .bind(ContributionStatus::Pending)
    .fetch_one(pool)
    .await?;
    Ok(contribution)
}

pub async fn get_contribution(pool: &SqlitePool, id: i64) -> Result<Option<Contribution>> {
    let contribution = sqlx::query_as::<_, Contribution>("SELECT * FROM contributions WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(contribution)
}

#[derive(sqlx::FromRow)]
struct ContributionRow {
    #[sqlx(flatten)]
    contribution: Contribution,
    contributor_wallet_address: String,
    contributor_username: Option<String>,
    verifier_wallet_address: Option<String>,
    verifier_username: Option<String>,
    project_title: String,
}

impl From<ContributionRow> for ContributionDetail {
    fn from(row: ContributionRow) -> Self {
        let verifier = row
            .contribution
            .verified_by
            .zip(row.verifier_wallet_address)
            .map(|(id, wallet_address)| Participant {
                id,
                wallet_address,
                username: row.verifier_username,
            });
        Self {
            contributor: Participant {
                id: row.contribution.contributor_id,
                wallet_address: row.contributor_wallet_address,
                username: row.contributor_username,
            },
            verifier,
            project_title: row.project_title,
            contribution: row.contribution,
        }
    }
}

const CONTRIBUTION_DETAIL: &str = r#"
    SELECT c.*,
           u.wallet_address AS contributor_wallet_address,
           u.username       AS contributor_username,
           v.wallet_address AS verifier_wallet_address,
           v.username       AS verifier_username,
           p.title          AS project_title
    FROM   contributions c
    JOIN   users u    ON u.id = c.contributor_id
    JOIN   projects p ON p.id = c.project_id
    LEFT   JOIN users v ON v.id = c.verified_by
"#;

/// Contributions to a project, newest first.
pub async fn list_contribution_details_by_project(
    pool: &SqlitePool,
    project_id: i64,
) -> Result<Vec<ContributionDetail>> {
    let sql = format!("{CONTRIBUTION_DETAIL} WHERE c.project_id = ?1 ORDER BY c.created_at DESC, c.id DESC");
    let rows = sqlx::query_as::<_, ContributionRow>(&sql)
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(ContributionDetail::from).collect())
}

/// A user's contributions, newest first.
pub async fn list_contribution_details_by_user(
    pool: &SqlitePool,
    contributor_id: i64,
) -> Result<Vec<ContributionDetail>> {
    let sql = format!("{CONTRIBUTION_DETAIL} WHERE c.contributor_id = ?1 ORDER BY c.created_at DESC, c.id DESC");
    let rows = sqlx::query_as::<_, ContributionRow>(&sql)
        .bind(contributor_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(ContributionDetail::from).collect())
}

pub async fn list_contributions_by_user(pool: &SqlitePool, contributor_id: i64) -> Result<Vec<Contribution>> {
    let rows = sqlx::query_as::<_, Contribution>(
        r#"
        SELECT * FROM contributions
        WHERE  contributor_id = ?1
        ORDER  BY created_at DESC, id DESC
        "#,
    )
    .bind(contributor_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Apply a verification decision. `weight` is left untouched when `None`.
pub async fn update_verification(
    pool: &SqlitePool,
    id: i64,
    status: ContributionStatus,
    weight: Option<i64>,
    verifier_id: i64,
) -> Result<Contribution> {
    let ts = now();
    let contribution = sqlx::query_as::<_, Contribution>(
        r#"
        UPDATE contributions
        SET    status = ?2,
               weight = COALESCE(?3, weight),
               verified_by = ?4,
               verified_at = ?5,
               updated_at = ?5
        WHERE  id = ?1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(weight)
    .bind(verifier_id)
    .bind(ts)
    .fetch_one(pool)
    .await?;
    Ok(contribution)
}

/// Record an issued credential. Returns `false` if one was already recorded.
pub async fn mark_credential_issued(pool: &SqlitePool, id: i64, credential_cid: &str) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE contributions
        SET    credential_issued = 1, credential_cid = ?2, updated_at = ?3
        WHERE  id = ?1 AND credential_issued = 0
        "#,
    )
    .bind(id)
    .bind(credential_cid)
    .bind(now())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_pool;

    #[tokio::test]
    async fn wallet_addresses_are_case_normalized() {
        let pool = test_pool().await;
        let created = upsert_user_nonce(&pool, "0xABCdef0000000000000000000000000000000001", "n1")
            .await
            .unwrap();
        assert_eq!(
            created.wallet_address,
            "0xabcdef0000000000000000000000000000000001"
        );

        let again = upsert_user_nonce(&pool, "0xabcDEF0000000000000000000000000000000001", "n2")
            .await
            .unwrap();
        assert_eq!(again.id, created.id);
        assert_eq!(again.nonce.as_deref(), Some("n2"));

        clear_nonce(&pool, created.id).await.unwrap();
        let found = find_user_by_address(&pool, "0xABCDEF0000000000000000000000000000000001")
            .await
            .unwrap()
            .unwrap();
        assert!(found.nonce.is_none());
    }

    #[tokio::test]
    async fn expired_sessions_do_not_resolve() {
        let pool = test_pool().await;
        let user = upsert_user_nonce(&pool, "0x0000000000000000000000000000000000000002", "n")
            .await
            .unwrap();
        create_session(&pool, "live", user.id, now() + 60).await.unwrap();
        create_session(&pool, "stale", user.id, now() - 1).await.unwrap();

        assert_eq!(find_session_user(&pool, "live").await.unwrap().unwrap().id, user.id);
        assert!(find_session_user(&pool, "stale").await.unwrap().is_none());
        assert!(find_session_user(&pool, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_minted_only_once() {
        let pool = test_pool().await;
        let user = upsert_user_nonce(&pool, "0x0000000000000000000000000000000000000003", "n")
            .await
            .unwrap();
        let project = insert_project(&pool, user.id, "Foo", "desc").await.unwrap();
        assert_eq!(project.status, ProjectStatus::Pending);
        assert!(project.nft_token_id.is_none());

        assert!(record_minted(&pool, project.id, 4, "0xgm").await.unwrap());
        assert!(!record_minted(&pool, project.id, 5, "0xgm").await.unwrap());
        let stored = get_project(&pool, project.id).await.unwrap().unwrap();
        assert_eq!(stored.nft_token_id, Some(4));
    }

    #[tokio::test]
    async fn only_pending_projects_are_deleted() {
        let pool = test_pool().await;
        let user = upsert_user_nonce(&pool, "0x0000000000000000000000000000000000000004", "n")
            .await
            .unwrap();
        let a = insert_project(&pool, user.id, "A", "a").await.unwrap();
        let b = insert_project(&pool, user.id, "B", "b").await.unwrap();
        update_project_status(&pool, b.id, ProjectStatus::ActiveVoting)
            .await
            .unwrap();

        assert!(delete_pending_project(&pool, a.id).await.unwrap());
        assert!(!delete_pending_project(&pool, b.id).await.unwrap());
        assert_eq!(list_projects(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn promote_admins_sets_flag() {
        let pool = test_pool().await;
        promote_admins(&pool, &["0xAAAA000000000000000000000000000000000005".to_string()])
            .await
            .unwrap();
        let admin = find_user_by_address(&pool, "0xaaaa000000000000000000000000000000000005")
            .await
            .unwrap()
            .unwrap();
        assert!(admin.is_admin);
    }

    #[tokio::test]
    async fn details_join_related_users() {
        let pool = test_pool().await;
        let creator = upsert_user_nonce(&pool, "0x0000000000000000000000000000000000000006", "n")
            .await
            .unwrap();
        let contributor = upsert_user_nonce(&pool, "0x0000000000000000000000000000000000000007", "n")
            .await
            .unwrap();
        let project = insert_project(&pool, creator.id, "Foo", "desc").await.unwrap();

        let detail = get_project_detail(&pool, project.id).await.unwrap().unwrap();
        assert_eq!(detail.creator.id, creator.id);
        assert_eq!(detail.creator.wallet_address, creator.wallet_address);
        assert_eq!(list_projects(&pool).await.unwrap()[0].project.id, project.id);
        assert!(get_project_detail(&pool, 999).await.unwrap().is_none());

        let c = insert_contribution(&pool, contributor.id, project.id, ContributionType::Design, "logo", None)
            .await
            .unwrap();
        let listed = list_contribution_details_by_project(&pool, project.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].contributor.wallet_address, contributor.wallet_address);
        assert_eq!(listed[0].project_title, "Foo");
        assert!(listed[0].verifier.is_none());

        update_verification(&pool, c.id, ContributionStatus::Verified, Some(3), creator.id)
            .await
            .unwrap();
        let mine = list_contribution_details_by_user(&pool, contributor.id).await.unwrap();
        assert_eq!(mine[0].verifier.as_ref().map(|v| v.id), Some(creator.id));
        assert_eq!(mine[0].contribution.weight, 3);
    }
}
