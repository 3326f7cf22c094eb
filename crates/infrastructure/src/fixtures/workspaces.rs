use intg_domain::{Project, User, Workspace};
use intg_errors::HarnessResult;
use sqlx::Row;
use tracing::{debug, instrument};

use super::{insertion, Fixtures};

const PROJECT_DESCRIPTION: &str = "description text";

impl Fixtures {
    /// Insert a workspace owned by `owner`. A missing or empty name is replaced
    /// by a random one.
    #[instrument(skip(self, owner), fields(owner_id = owner.id))]
    pub async fn create_workspace(&self, name: Option<&str>, owner: &User) -> HarnessResult<Workspace> {
        let name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.random_name("workspace"),
        };
        let id = sqlx::query_scalar(
            "INSERT INTO workspaces (name, user_id) VALUES ($1, $2) RETURNING id",
        )
        .bind(&name)
        .bind(owner.id)
        .fetch_one(self.pool())
        .await
        .map_err(insertion("workspace"))?;

        debug!(workspace_id = id, %name, "created workspace");
        Ok(Workspace {
            id,
            name,
            user_id: owner.id,
        })
    }

    /// Insert one workspace per name and return their ids in the same order.
    pub async fn create_workspaces(&self, names: &[String], owner: &User) -> HarnessResult<Vec<i32>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query(
            r#"
            INSERT INTO workspaces (name, user_id)
            SELECT name, $2 FROM unnest($1::text[]) AS name
            "#,
        )
        .bind(names)
        .bind(owner.id)
        .execute(self.pool())
        .await
        .map_err(insertion("workspace"))?;

        let rows = sqlx::query("SELECT id, name FROM workspaces WHERE name = ANY($1)")
            .bind(names)
            .fetch_all(self.pool())
            .await?;

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            for row in &rows {
                if row.try_get::<String, _>("name")? == *name {
                    ids.push(row.try_get("id")?);
                    break;
                }
            }
        }
        debug!(count = ids.len(), "created workspaces");
        Ok(ids)
    }

    /// The only fixture that removes rows. Projects go with their workspace.
    pub async fn delete_workspaces(&self, ids: &[i32]) -> HarnessResult<u64> {
        let result = sqlx::query("DELETE FROM workspaces WHERE id = ANY($1)")
            .bind(ids)
            .execute(self.pool())
            .await?;
        debug!(deleted = result.rows_affected(), "deleted workspaces");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, workspace), fields(workspace_id = workspace.id))]
    pub async fn create_project(&self, workspace: &Workspace, archived: bool) -> HarnessResult<Project> {
        self.create_named_project(workspace, None, archived).await
    }

    pub async fn create_named_project(
        &self,
        workspace: &Workspace,
        name: Option<&str>,
        archived: bool,
    ) -> HarnessResult<Project> {
        let name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.random_name("project"),
        };
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO projects (workspace_id, name, archived, description, user_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(workspace.id)
        .bind(&name)
        .bind(archived)
        .bind(PROJECT_DESCRIPTION)
        .bind(workspace.user_id)
        .fetch_one(self.pool())
        .await
        .map_err(insertion("project"))?;

        debug!(project_id = id, %name, "created project");
        Ok(Project {
            id,
            workspace_id: workspace.id,
            name,
            archived,
            description: PROJECT_DESCRIPTION.to_string(),
        })
    }

    /// Hyperparameter names recorded for a project by its experiments.
    pub async fn project_hyperparameters(&self, project_id: i32) -> HarnessResult<Vec<String>> {
        let names = sqlx::query_scalar("SELECT hyperparameters FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_one(self.pool())
            .await?;
        Ok(names)
    }
}
