//! Project lifecycle orchestration.
//!
//! Every operation that needs statement-at-a-time semantics (CREATE/DROP
//! DATABASE cannot run inside a transaction block) enables auto-commit,
//! runs, and restores batch mode in a cleanup step even on failure.
//! Cross-database steps are compensated, not atomic: a failed restore
//! drops the database it created, a failed reopen falls back to the
//! server-only connection.

use std::sync::Arc;

use async_trait::async_trait;
use tabula_core::{
    EventOutcome, EventReporter, ProjectIdentity, ProjectMetadata, Result, TabulaError,
    DEFAULT_DATABASE,
};
use tabula_schema::{
    owner_command, DatabaseObject, FunctionBuilder, StructureColumnProvider,
};
use tabula_session::{DbSession, LockCoordinator};

use crate::backup::BackupLimiter;
use crate::prefs::{keys, PreferenceStore};
use crate::process::ProcessOrchestrator;

/// Pick a restore target name that does not collide with any existing
/// database. The first candidate appends `_restored`; later ones add an
/// increasing counter.
fn restore_target(visible_name: &str, existing: &[String]) -> ProjectIdentity {
    let mut candidate = ProjectIdentity::new(format!("{visible_name}_restored"));
    let mut counter = 1;
    while existing.iter().any(|db| db == candidate.database_name()) {
        candidate = ProjectIdentity::new(format!("{visible_name}_restored_{counter}"));
        counter += 1;
    }
    candidate
}

/// Host participation points in the project-open sequence.
///
/// `before_handlers` and `after_handlers` bracket handler initialization
/// and are where the host applies schema patches; `initialize_handlers`
/// is where its table, data-type, and script handlers load their state.
#[async_trait]
pub trait OpenHooks: Send + Sync {
    async fn before_handlers(&self, _session: &DbSession) -> Result<()> {
        Ok(())
    }

    async fn initialize_handlers(&self, _session: &DbSession) -> Result<()> {
        Ok(())
    }

    async fn after_handlers(&self, _session: &DbSession) -> Result<()> {
        Ok(())
    }
}

/// Hooks for hosts with nothing to initialize.
#[derive(Debug, Default)]
pub struct NoHooks;

#[async_trait]
impl OpenHooks for NoHooks {}

/// Drives the full project lifecycle over one owned session.
pub struct ProjectManager {
    session: DbSession,
    lock: LockCoordinator,
    process: ProcessOrchestrator,
    limiter: BackupLimiter,
    columns: Arc<dyn StructureColumnProvider>,
    hooks: Arc<dyn OpenHooks>,
    prefs: Arc<parking_lot::Mutex<dyn PreferenceStore>>,
    reporter: Arc<dyn EventReporter>,
}

impl ProjectManager {
    pub fn new(
        session: DbSession,
        limiter: BackupLimiter,
        columns: Arc<dyn StructureColumnProvider>,
        hooks: Arc<dyn OpenHooks>,
        prefs: Arc<parking_lot::Mutex<dyn PreferenceStore>>,
        reporter: Arc<dyn EventReporter>,
    ) -> Self {
        Self {
            session,
            lock: LockCoordinator,
            process: ProcessOrchestrator::new(),
            limiter,
            columns,
            hooks,
            prefs,
            reporter,
        }
    }

    pub fn session(&self) -> &DbSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DbSession {
        &mut self.session
    }

    /// Create a new, empty project database with its metadata comment.
    #[tracing::instrument(skip(self, description))]
    pub async fn create_project(
        &mut self,
        name: &str,
        owner: &str,
        description: &str,
    ) -> Result<()> {
        let identity = ProjectIdentity::new(name);
        let metadata = ProjectMetadata::new(
            false,
            name,
            vec![self.session.config().user.clone()],
            description,
        );

        self.session.set_auto_commit(true);
        let result = self
            .create_project_inner(&identity, owner, &metadata)
            .await;
        self.session.set_auto_commit(false);

        match result {
            Ok(()) => {
                self.reporter.report(
                    EventOutcome::Success,
                    &format!("Project '{name}' created"),
                );
                Ok(())
            }
            Err(err) => {
                self.reporter.report(
                    EventOutcome::Failure,
                    &format!("Cannot create project '{name}': {err}"),
                );
                Err(err)
            }
        }
    }

    async fn create_project_inner(
        &self,
        identity: &ProjectIdentity,
        owner: &str,
        metadata: &ProjectMetadata,
    ) -> Result<()> {
        let db = identity.database_name();
        self.session
            .execute_update(&format!("CREATE DATABASE {db} ENCODING 'UTF8'; "))
            .await?;
        self.session
            .execute_update(&format!(
                "{}{}",
                metadata.comment_command(db),
                owner_command(owner, DatabaseObject::Database, db),
            ))
            .await
    }

    /// Open a project: connect, build the schema support objects on first
    /// use, derive the caller's access level, take the cooperative lock,
    /// and persist the session preferences.
    #[tracing::instrument(skip(self), fields(project = identity.visible_name()))]
    pub async fn open_project(&mut self, identity: &ProjectIdentity) -> Result<()> {
        self.session.close().await?;
        self.session.connect(identity, false).await?;

        if !self.session.is_project_connected() {
            // Opening the maintenance database needs no schema setup,
            // locking, or preference updates.
            return Ok(());
        }

        match self.finish_open(identity).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.reporter.report(
                    EventOutcome::Failure,
                    &format!(
                        "Cannot open project '{}': {err}",
                        identity.visible_name()
                    ),
                );
                // Never leave a half-initialized project open.
                let _ = self.session.close().await;
                let _ = self.session.connect_to_server().await;
                Err(err)
            }
        }
    }

    async fn finish_open(&mut self, identity: &ProjectIdentity) -> Result<()> {
        let builder = FunctionBuilder::new(&self.session, self.reporter.as_ref());
        builder.create_tables_and_functions().await?;

        self.hooks.before_handlers(&self.session).await?;
        self.hooks.initialize_handlers(&self.session).await?;

        builder
            .create_structure_functions(&self.columns.structure_columns())
            .await?;
        self.hooks.after_handlers(&self.session).await?;

        self.session.refresh_access_level().await?;
        self.lock
            .acquire(&self.session, identity.database_name())
            .await?;

        self.persist_preferences(identity)
    }

    fn persist_preferences(&self, identity: &ProjectIdentity) -> Result<()> {
        let config = self.session.config();
        let mut prefs = self.prefs.lock();
        prefs.put(keys::LAST_PROJECT, identity.visible_name())?;
        prefs.put(keys::LAST_USER, &config.user)?;
        prefs.put(keys::LAST_HOST, &config.host)?;
        prefs.put(keys::LAST_PORT, &config.port.to_string())?;
        prefs.put(keys::LAST_SSL, if config.ssl { "true" } else { "false" })?;
        prefs.push_recent(keys::RECENT_PROJECTS, identity.visible_name())
    }

    /// Close whatever is open and fall back to the server-only session.
    pub async fn close_project(&mut self) -> Result<()> {
        self.session.close().await?;
        self.session.connect_to_server().await
    }

    /// Rename a project. A rename to the same database name only rewrites
    /// the metadata comment. Renaming the currently open project routes
    /// through the default database first and reopens afterwards.
    #[tracing::instrument(skip(self, description))]
    pub async fn rename_project(
        &mut self,
        old: &ProjectIdentity,
        new_name: &str,
        description: &str,
    ) -> Result<()> {
        let was_open = self.session.is_project_connected()
            && self.session.active_database() == old.database_name();
        if was_open {
            self.open_default_database().await?;
        }

        let new_identity = ProjectIdentity::new(new_name);
        let current = self.session.project_metadata(old.database_name()).await?;
        let metadata = ProjectMetadata::new(false, new_name, current.admins, description);

        self.session.set_auto_commit(true);
        let result = if new_identity.database_name() == old.database_name() {
            self.session
                .execute_update(&metadata.comment_command(old.database_name()))
                .await
        } else {
            self.session
                .execute_update(&format!(
                    "ALTER DATABASE {} RENAME TO {}; {}",
                    old.database_name(),
                    new_identity.database_name(),
                    metadata.comment_command(new_identity.database_name()),
                ))
                .await
        };
        self.session.set_auto_commit(false);

        match result {
            Ok(()) => {
                self.reporter.report(
                    EventOutcome::Success,
                    &format!(
                        "Project '{}' renamed to '{new_name}'",
                        old.visible_name()
                    ),
                );
                if was_open {
                    self.open_project(&new_identity).await?;
                }
                Ok(())
            }
            Err(err) => {
                self.reporter.report(
                    EventOutcome::Failure,
                    &format!("Cannot rename project '{}': {err}", old.visible_name()),
                );
                if was_open {
                    // Best effort; the rename already failed.
                    let _ = self.open_project(old).await;
                }
                Err(err)
            }
        }
    }

    /// Copy a project using the source as a template. The source must have
    /// no open connections, so copying the active project detours through
    /// the default database and reopens the source afterwards.
    #[tracing::instrument(skip(self, description))]
    pub async fn copy_project(
        &mut self,
        source: &ProjectIdentity,
        copy_name: &str,
        description: &str,
    ) -> Result<()> {
        let was_open = self.session.is_project_connected()
            && self.session.active_database() == source.database_name();
        if was_open {
            self.open_default_database().await?;
        }

        let copy = ProjectIdentity::new(copy_name);
        let owner = self.session.database_owner(source.database_name()).await?;
        let current = self
            .session
            .project_metadata(source.database_name())
            .await?;
        let metadata = ProjectMetadata::new(false, copy_name, current.admins, description);

        self.session.set_auto_commit(true);
        let result = self
            .copy_project_inner(source, &copy, &owner, &metadata)
            .await;
        self.session.set_auto_commit(false);

        let outcome = match &result {
            Ok(()) => (
                EventOutcome::Success,
                format!("Project '{}' copied to '{copy_name}'", source.visible_name()),
            ),
            Err(err) => (
                EventOutcome::Failure,
                format!("Cannot copy project '{}': {err}", source.visible_name()),
            ),
        };
        self.reporter.report(outcome.0, &outcome.1);

        if was_open {
            self.open_project(source).await?;
        }
        result
    }

    async fn copy_project_inner(
        &self,
        source: &ProjectIdentity,
        copy: &ProjectIdentity,
        owner: &str,
        metadata: &ProjectMetadata,
    ) -> Result<()> {
        let copy_db = copy.database_name();
        self.session
            .execute_update(&format!(
                "CREATE DATABASE {copy_db} WITH TEMPLATE {}; {}{}",
                source.database_name(),
                metadata.comment_command(copy_db),
                owner_command(owner, DatabaseObject::Database, copy_db),
            ))
            .await
    }

    /// Drop a project database. Refuses to drop the project currently
    /// open on this session.
    #[tracing::instrument(skip(self))]
    pub async fn delete_project(&mut self, identity: &ProjectIdentity) -> Result<()> {
        if self.session.is_project_connected()
            && self.session.active_database() == identity.database_name()
        {
            return Err(TabulaError::Other(
                "cannot delete the currently open project".into(),
            ));
        }

        self.session.set_auto_commit(true);
        let result = self
            .session
            .execute_update(&format!("DROP DATABASE {}; ", identity.database_name()))
            .await;
        self.session.set_auto_commit(false);

        match result {
            Ok(()) => {
                self.reporter.report(
                    EventOutcome::Success,
                    &format!("Project '{}' deleted", identity.visible_name()),
                );
                Ok(())
            }
            Err(err) => {
                self.reporter.report(
                    EventOutcome::Failure,
                    &format!("Cannot delete project '{}': {err}", identity.visible_name()),
                );
                Err(err)
            }
        }
    }

    /// Dump a project to a file with pg_dump. Bounded by the backup
    /// limiter; the permit covers the whole child process run.
    #[tracing::instrument(skip(self))]
    pub async fn backup_project(&self, identity: &ProjectIdentity, file: &str) -> Result<()> {
        let _permit = self.limiter.acquire().await?;
        let config = self.session.config();

        let mut command = format!("pg_dump -U {}", config.user);
        if !config.is_default_host() {
            command.push_str(&format!(" -h {}", config.host));
        }
        if !config.is_default_port() {
            command.push_str(&format!(" -p {}", config.port));
        }
        command.push_str(&format!(
            " --no-password --no-owner --file \"{file}\" {}",
            identity.database_name()
        ));

        let result = self
            .process
            .run_tool(&command, &config.user, &config.password)
            .await;
        match result {
            Ok(()) => {
                self.reporter.report(
                    EventOutcome::Success,
                    &format!("Project '{}' backed up to {file}", identity.visible_name()),
                );
                Ok(())
            }
            Err(err) => {
                self.reporter.report(
                    EventOutcome::Failure,
                    &format!("Cannot back up project '{}': {err}", identity.visible_name()),
                );
                Err(err)
            }
        }
    }

    /// Restore a dump file into a project database. Unless overwriting,
    /// the restore lands in a fresh database whose name is derived from
    /// the project name and made unique against the live database list.
    #[tracing::instrument(skip(self))]
    pub async fn restore_project(
        &mut self,
        name: &str,
        file: &str,
        overwrite: bool,
    ) -> Result<()> {
        let _permit = self.limiter.acquire().await?;

        let target = if overwrite {
            ProjectIdentity::new(name)
        } else {
            let existing: Vec<String> = self
                .session
                .database_list()
                .await?
                .into_iter()
                .map(|(db, _)| db)
                .collect();
            restore_target(name, &existing)
        };
        let metadata = ProjectMetadata::new(
            false,
            target.visible_name(),
            vec![self.session.config().user.clone()],
            format!("Restored from {file}"),
        );

        let created = !overwrite;
        if created {
            let owner = self.session.config().user.clone();
            self.session.set_auto_commit(true);
            let create = self.create_project_inner(&target, &owner, &metadata).await;
            self.session.set_auto_commit(false);
            create?;
        }

        let result = self.run_restore_tool(&target, file).await;
        match result {
            Ok(()) => {
                if overwrite {
                    // The dump may carry a stale comment; rewrite it.
                    self.session.set_auto_commit(true);
                    let comment = self
                        .session
                        .execute_update(&metadata.comment_command(target.database_name()))
                        .await;
                    self.session.set_auto_commit(false);
                    comment?;
                }
                self.reporter.report(
                    EventOutcome::Success,
                    &format!(
                        "Project restored from {file} as '{}'",
                        target.visible_name()
                    ),
                );
                Ok(())
            }
            Err(err) => {
                if created {
                    self.session.set_auto_commit(true);
                    let _ = self
                        .session
                        .execute_update(&format!(
                            "DROP DATABASE {}; ",
                            target.database_name()
                        ))
                        .await;
                    self.session.set_auto_commit(false);
                }
                self.reporter.report(
                    EventOutcome::Failure,
                    &format!("Cannot restore project from {file}: {err}"),
                );
                Err(err)
            }
        }
    }

    async fn run_restore_tool(&self, target: &ProjectIdentity, file: &str) -> Result<()> {
        let config = self.session.config();
        let mut command = format!("psql -U {}", config.user);
        if !config.is_default_host() {
            command.push_str(&format!(" -h {}", config.host));
        }
        if !config.is_default_port() {
            command.push_str(&format!(" -p {}", config.port));
        }
        command.push_str(&format!(
            " -d {} --stop-on-error -f \"{file}\"",
            target.database_name()
        ));
        self.process
            .run_tool(&command, &config.user, &config.password)
            .await
    }

    /// Switch the session to the maintenance database, releasing the
    /// project connection so the project can be renamed, copied, or used
    /// as a template.
    async fn open_default_database(&mut self) -> Result<()> {
        self.session.close().await?;
        self.session
            .connect(&ProjectIdentity::new(DEFAULT_DATABASE), false)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_target_without_collision() {
        let target = restore_target("Flight", &["postgres".into(), "flight".into()]);
        assert_eq!(target.database_name(), "flight_restored");
        assert_eq!(target.visible_name(), "Flight_restored");
    }

    #[test]
    fn test_restore_target_increments_on_collision() {
        let existing = vec![
            "foo".to_string(),
            "foo_restored".to_string(),
            "foo_restored_1".to_string(),
        ];
        let target = restore_target("foo", &existing);
        assert_eq!(target.database_name(), "foo_restored_2");
    }

    #[test]
    fn test_restore_target_encodes_database_name() {
        let target = restore_target("My Project", &[]);
        assert_eq!(target.database_name(), "my_project_restored");
    }
}
