//! The single live database session
//!
//! Exactly one connection handle exists at a time. `close` must fully
//! complete before a new `connect` starts, and all SQL is routed through
//! this handle; callers serialize access to it.

use std::sync::Arc;
use std::time::Duration;

use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::{Client, NoTls};

use tabula_core::{
    AccessLevel, ConnectionState, EventOutcome, EventReporter, ProjectIdentity, ProjectMetadata,
    Result, TabulaError, DEFAULT_DATABASE,
};

use crate::SessionConfig;

/// Session-scoped table used by the generated search functions to stage
/// results. Temporary tables do not survive a dropped connection, so it is
/// recreated on reconnect.
pub const TEMP_RESULTS_TABLE: &str = "__temp_results";

/// Bound on the driver-level login attempt.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Translate a driver error into the Tabula error taxonomy.
///
/// Authentication failures are distinguished by SQLSTATE and message text;
/// they drive a credential re-prompt rather than a hard error. Commit-time
/// conflicts under serializable isolation map to `Serialization`, which the
/// caller recovers from with `reconnect` plus re-issuing the operation.
pub fn classify_db_error(error: tokio_postgres::Error) -> TabulaError {
    let message = match error.as_db_error() {
        Some(db_error) => db_error.message().to_string(),
        None => error.to_string(),
    };

    if let Some(code) = error.code() {
        match code.code() {
            "28P01" | "28000" => return TabulaError::Authentication(message),
            "40001" => return TabulaError::Serialization(message),
            _ => {}
        }
    }

    if message.contains("password authentication failed") {
        return TabulaError::Authentication(message);
    }

    TabulaError::Connection(message)
}

fn access_level_from_lookup(lookup: Result<Option<String>>) -> AccessLevel {
    match lookup {
        Ok(Some(value)) => AccessLevel::from_db(&value),
        Ok(None) => AccessLevel::ReadOnly,
        Err(e) => {
            tracing::debug!(error = %e, "user access lookup failed; defaulting to read-only");
            AccessLevel::ReadOnly
        }
    }
}

/// The connection manager: state machine plus session-scoped fields.
pub struct DbSession {
    config: SessionConfig,
    client: Option<Client>,
    state: ConnectionState,
    active_database: String,
    active_project: Option<ProjectIdentity>,
    active_owner: String,
    access_level: AccessLevel,
    reserved_words: Vec<String>,
    auto_commit: bool,
    reporter: Arc<dyn EventReporter>,
}

impl DbSession {
    pub fn new(config: SessionConfig, reporter: Arc<dyn EventReporter>) -> Self {
        Self {
            config,
            client: None,
            state: ConnectionState::Disconnected,
            active_database: String::new(),
            active_project: None,
            active_owner: String::new(),
            access_level: AccessLevel::ReadOnly,
            reserved_words: Vec::new(),
            auto_commit: false,
            reporter,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_server_connected(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    pub fn is_project_connected(&self) -> bool {
        self.state == ConnectionState::Project
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Update credentials before a retry after an authentication failure.
    pub fn set_credentials(&mut self, user: impl Into<String>, password: impl Into<String>) {
        self.config.user = user.into();
        self.config.password = password.into();
    }

    pub fn active_database(&self) -> &str {
        &self.active_database
    }

    pub fn active_project(&self) -> Option<&ProjectIdentity> {
        self.active_project.as_ref()
    }

    /// Role owning the open project's database objects.
    pub fn active_owner(&self) -> &str {
        &self.active_owner
    }

    pub fn access_level(&self) -> AccessLevel {
        self.access_level
    }

    /// Reserved words reported by the currently contacted server.
    pub fn reserved_words(&self) -> &[String] {
        &self.reserved_words
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| TabulaError::Connection("no live database connection".into()))
    }

    /// Open a driver connection to the named database on the configured
    /// server, with a bounded login timeout and the configured TLS mode.
    ///
    /// SSL connects deliberately skip certificate validation; the servers
    /// this tool targets run with self-signed certificates.
    async fn open_client(&self, database: &str) -> Result<Client> {
        self.config.validate()?;

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&self.config.host)
            .port(self.config.port)
            .dbname(database.to_lowercase())
            .user(&self.config.user)
            .password(&self.config.password)
            .connect_timeout(LOGIN_TIMEOUT);

        let client = if self.config.ssl {
            let connector = TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|e| TabulaError::Connection(format!("cannot build TLS connector: {e}")))?;
            let tls = MakeTlsConnector::new(connector);

            let (client, connection) = pg_config.connect(tls).await.map_err(classify_db_error)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(error = %e, "PostgreSQL connection error");
                }
            });
            client
        } else {
            let (client, connection) = pg_config.connect(NoTls).await.map_err(classify_db_error)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(error = %e, "PostgreSQL connection error");
                }
            });
            client
        };

        Ok(client)
    }

    /// Connect to the server's default database only.
    pub async fn connect_to_server(&mut self) -> Result<()> {
        let server = ProjectIdentity::new(DEFAULT_DATABASE);
        self.connect(&server, false).await
    }

    /// Connect to a project database (or the default database).
    ///
    /// On any failure against a non-default target the session falls back
    /// to a server-only connection, so it is left in a known usable state
    /// rather than disconnected. The fallback covers the whole sequence,
    /// driver-level login included: a target database that does not exist
    /// or refuses the connection still leaves the session on the server's
    /// default database.
    #[tracing::instrument(skip(self, identity), fields(database = identity.database_name()))]
    pub async fn connect(&mut self, identity: &ProjectIdentity, reconnect: bool) -> Result<()> {
        self.drop_client();

        let database = identity.database_name().to_string();
        match self.connect_inner(identity, reconnect).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.drop_client();
                if database != DEFAULT_DATABASE {
                    self.reporter.report(
                        EventOutcome::Failure,
                        &format!(
                            "Cannot connect to project database '{}' as user '{}'; cause '{}'",
                            self.config.server_and_database(&database),
                            self.config.user,
                            e
                        ),
                    );
                    // Leave the session usable rather than half-open.
                    let server = ProjectIdentity::new(DEFAULT_DATABASE);
                    if self.connect_inner(&server, false).await.is_err() {
                        self.drop_client();
                    }
                }
                Err(e)
            }
        }
    }

    async fn connect_inner(&mut self, identity: &ProjectIdentity, reconnect: bool) -> Result<()> {
        let database = identity.database_name().to_string();
        let client = self.open_client(&database).await?;

        client
            .batch_execute("SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .await
            .map_err(classify_db_error)?;

        self.client = Some(client);
        self.auto_commit = false;
        self.state = ConnectionState::ServerOnly;
        self.active_database = database.clone();

        // A different server may reserve different words, so the list is
        // refreshed on every server-level contact.
        if self.reserved_words.is_empty() || database == DEFAULT_DATABASE {
            self.refresh_reserved_words().await?;
        }

        if database == DEFAULT_DATABASE {
            if reconnect {
                self.recreate_temp_table().await?;
            }
            self.active_project = None;
            self.reporter.report(
                EventOutcome::Success,
                &format!("Connected to server as user '{}'", self.config.user),
            );
            return Ok(());
        }

        self.finish_project_connect(identity, reconnect).await
    }

    async fn finish_project_connect(
        &mut self,
        identity: &ProjectIdentity,
        reconnect: bool,
    ) -> Result<()> {
        let database = identity.database_name();

        // Interactive sessions honor the cooperative lock; headless runs
        // intentionally share the project unlocked.
        if !self.config.headless {
            let metadata = self.project_metadata(database).await.map_err(|_| {
                TabulaError::Connection(format!(
                    "cannot obtain comment for project database '{database}'"
                ))
            })?;

            crate::LockCoordinator.check_open(
                metadata.locked,
                reconnect,
                self.config.headless,
                database,
            )?;
        }

        let accessible = self.databases_by_user(&self.config.user).await?;
        if !accessible.iter().any(|name| name.eq_ignore_ascii_case(database)) {
            return Err(TabulaError::AccessDenied(format!(
                "user '{}' lacks access to project database '{database}'",
                self.config.user
            )));
        }

        self.active_owner = self.database_owner(database).await?;
        self.active_project = Some(identity.clone());
        self.state = ConnectionState::Project;
        self.refresh_access_level().await?;

        if reconnect {
            self.recreate_temp_table().await?;
        }

        self.reporter.report(
            EventOutcome::Success,
            &format!(
                "Connected to project database '{database}' as user '{}'",
                self.config.user
            ),
        );
        Ok(())
    }

    /// Re-open the current project, e.g. after a serialization failure or a
    /// dropped connection, without re-running schema setup.
    pub async fn reconnect(&mut self) -> Result<()> {
        match self.active_project.clone() {
            Some(identity) => self.connect(&identity, true).await,
            None => self.connect_to_server().await,
        }
    }

    /// Close the live connection. Idempotent; releasing the project lock
    /// happens first when a project is open.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }

        if self.state == ConnectionState::Project {
            let database = self.active_database.clone();
            if let Err(e) = crate::LockCoordinator.release(self, &database).await {
                tracing::warn!(error = %e, database, "could not release project lock on close");
            }
        }

        let was_project = self.state == ConnectionState::Project;
        let closed = self.active_database.clone();
        self.drop_client();

        self.reporter.report(
            EventOutcome::Success,
            &if was_project {
                format!("Project database '{closed}' closed")
            } else {
                "Server connection closed".to_string()
            },
        );
        Ok(())
    }

    fn drop_client(&mut self) {
        self.client = None;
        self.state = ConnectionState::Disconnected;
        self.active_database.clear();
        self.active_project = None;
        self.active_owner.clear();
        self.access_level = AccessLevel::ReadOnly;
    }

    /// Switch between per-statement commits (required for CREATE/DROP
    /// DATABASE) and batched explicit transactions. Lifecycle operations
    /// always restore batched mode in their cleanup step.
    pub fn set_auto_commit(&mut self, auto_commit: bool) {
        self.auto_commit = auto_commit;
    }

    /// Execute one or more statements through the live handle.
    ///
    /// In batched mode the statements run inside a single explicit
    /// transaction; in auto-commit mode they run bare.
    pub async fn execute_update(&self, sql: &str) -> Result<()> {
        let client = self.client()?;
        self.reporter.report(EventOutcome::Command, sql);
        if self.auto_commit {
            client.batch_execute(sql).await.map_err(classify_db_error)
        } else {
            let wrapped = format!("BEGIN; {sql} COMMIT;");
            client
                .batch_execute(&wrapped)
                .await
                .map_err(classify_db_error)
        }
    }

    async fn refresh_reserved_words(&mut self) -> Result<()> {
        let rows = self
            .client()?
            .query(
                "SELECT word FROM pg_get_keywords() WHERE catcode <> 'U'",
                &[],
            )
            .await
            .map_err(classify_db_error)?;
        self.reserved_words = rows.iter().map(|row| row.get::<_, String>(0)).collect();
        tracing::debug!(count = self.reserved_words.len(), "reserved word list refreshed");
        Ok(())
    }

    async fn recreate_temp_table(&self) -> Result<()> {
        let sql = format!(
            "DROP TABLE IF EXISTS {table}; CREATE TEMPORARY TABLE {table} (temp_result text)",
            table = TEMP_RESULTS_TABLE
        );
        self.client()?
            .batch_execute(&sql)
            .await
            .map_err(classify_db_error)
    }

    /// List all non-template databases with their comments.
    pub async fn database_list(&self) -> Result<Vec<(String, Option<String>)>> {
        let rows = self
            .client()?
            .query(
                "SELECT datname, shobj_description(oid, 'pg_database') \
                 FROM pg_database WHERE datistemplate = false ORDER BY datname",
                &[],
            )
            .await
            .map_err(classify_db_error)?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, Option<String>>(1)))
            .collect())
    }

    /// List the databases the given user may connect to.
    pub async fn databases_by_user(&self, user: &str) -> Result<Vec<String>> {
        let rows = self
            .client()?
            .query(
                "SELECT datname FROM pg_database WHERE datistemplate = false \
                 AND has_database_privilege($1, datname, 'CONNECT') ORDER BY datname",
                &[&user],
            )
            .await
            .map_err(classify_db_error)?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    /// Role that owns the named database.
    pub async fn database_owner(&self, database: &str) -> Result<String> {
        let row = self
            .client()?
            .query_opt(
                "SELECT pg_get_userbyid(datdba)::text FROM pg_database WHERE datname = $1",
                &[&database.to_lowercase()],
            )
            .await
            .map_err(classify_db_error)?;
        row.map(|row| row.get::<_, String>(0))
            .ok_or_else(|| TabulaError::NotFound(format!("database '{database}' does not exist")))
    }

    /// All roles on the server that may log in.
    pub async fn user_list(&self) -> Result<Vec<String>> {
        let rows = self
            .client()?
            .query(
                "SELECT rolname FROM pg_roles WHERE rolcanlogin ORDER BY rolname",
                &[],
            )
            .await
            .map_err(classify_db_error)?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    /// Raw comment attached to the named database, if any.
    pub async fn database_comment(&self, database: &str) -> Result<Option<String>> {
        let row = self
            .client()?
            .query_opt(
                "SELECT description FROM pg_shdescription \
                 JOIN pg_database ON objoid = pg_database.oid WHERE datname = $1",
                &[&database.to_lowercase()],
            )
            .await
            .map_err(classify_db_error)?;
        Ok(row.map(|row| row.get::<_, String>(0)))
    }

    /// Read a project's metadata record.
    ///
    /// The database comment is authoritative; when it is missing or does not
    /// carry the project marker, the internal mirror table of the currently
    /// open project is consulted as a fallback.
    pub async fn project_metadata(&self, database: &str) -> Result<ProjectMetadata> {
        if let Some(comment) = self.database_comment(database).await? {
            if let Some(metadata) = ProjectMetadata::parse(&database.to_lowercase(), &comment) {
                return Ok(metadata);
            }
        }

        if self.active_database.eq_ignore_ascii_case(database) {
            if let Some(metadata) = self.metadata_from_mirror().await? {
                return Ok(metadata);
            }
        }

        Err(TabulaError::NotFound(format!(
            "database '{database}' has no project metadata"
        )))
    }

    async fn metadata_from_mirror(&self) -> Result<Option<ProjectMetadata>> {
        let row = self
            .client()?
            .query_opt(
                "SELECT locked, visible_name, admins, description FROM __project LIMIT 1",
                &[],
            )
            .await;

        // The mirror table may simply not exist yet; that is not an error.
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::debug!(error = %e, "project metadata mirror unavailable");
                return Ok(None);
            }
        };

        Ok(row.map(|row| {
            let admins: String = row.get(2);
            ProjectMetadata::new(
                row.get::<_, bool>(0),
                row.get::<_, String>(1),
                admins
                    .split(',')
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
                row.get::<_, String>(3),
            )
        }))
    }

    /// Read-modify-write the metadata record with the given lock flag.
    pub async fn set_lock_status(&self, database: &str, locked: bool) -> Result<()> {
        let mut metadata = self.project_metadata(database).await?;
        metadata.locked = locked;
        self.execute_update(&metadata.comment_command(database)).await?;
        self.reporter.report(
            EventOutcome::Success,
            &format!(
                "Project database '{database}' {}",
                if locked { "locked" } else { "unlocked" }
            ),
        );
        Ok(())
    }

    /// Derive the current user's access level from the internal users
    /// table. Absent users are read-only, as is any user whose lookup
    /// fails (on the very first open the users table does not exist yet).
    /// Re-run on every project connect, never cached across connects.
    pub async fn refresh_access_level(&mut self) -> Result<AccessLevel> {
        let lookup = self
            .client()?
            .query_opt(
                "SELECT access_level FROM __users WHERE user_name = $1",
                &[&self.config.user],
            )
            .await
            .map_err(classify_db_error)
            .map(|row| row.map(|row| row.get::<_, String>(0)));

        self.access_level = access_level_from_lookup(lookup);
        tracing::debug!(user = %self.config.user, level = ?self.access_level, "access level derived");
        Ok(self.access_level)
    }

    /// Whether a table exists in the open database's public schema.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = self
            .client()?
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_name = $1)",
                &[&table],
            )
            .await
            .map_err(classify_db_error)?;
        Ok(row.get::<_, bool>(0))
    }

    /// Server version string, for display and diagnostics.
    pub async fn server_version(&self) -> Result<String> {
        let row = self
            .client()?
            .query_one("SELECT version()", &[])
            .await
            .map_err(classify_db_error)?;
        Ok(row.get::<_, String>(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tabula_core::LogReporter;

    fn session(config: SessionConfig) -> DbSession {
        DbSession::new(config, Arc::new(LogReporter))
    }

    #[derive(Default)]
    struct RecordingReporter {
        events: Mutex<Vec<(EventOutcome, String)>>,
    }

    impl EventReporter for RecordingReporter {
        fn report(&self, outcome: EventOutcome, text: &str) {
            self.events.lock().unwrap().push((outcome, text.to_string()));
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_when_disconnected() {
        let mut session = session(SessionConfig::default());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.close().await.is_ok());
        assert!(session.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_requires_configuration() {
        let mut session = session(SessionConfig::default());
        let result = session.connect_to_server().await;
        assert!(matches!(result, Err(TabulaError::Configuration(_))));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_execute_without_connection_fails() {
        let session = session(SessionConfig::default());
        let result = session.execute_update("SELECT 1").await;
        assert!(matches!(result, Err(TabulaError::Connection(_))));
    }

    #[tokio::test]
    async fn test_project_connect_driver_failure_reports_and_falls_back() {
        // Nothing listens on port 1, so the driver-level login itself
        // fails. The failure must still be reported and a server fallback
        // attempted; with no server reachable either, the session ends up
        // cleanly disconnected rather than half-open.
        let reporter = Arc::new(RecordingReporter::default());
        let config = SessionConfig {
            host: "127.0.0.1".into(),
            port: 1,
            user: "alice".into(),
            ..Default::default()
        };
        let mut session = DbSession::new(config, reporter.clone());

        let result = session
            .connect(&ProjectIdentity::new("Missing Project"), false)
            .await;
        assert!(matches!(result, Err(TabulaError::Connection(_))));

        let events = reporter.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|(outcome, text)| *outcome == EventOutcome::Failure
                && text.contains("missing_project")));

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.active_database().is_empty());
    }

    #[test]
    fn test_access_level_lookup_defaults_to_read_only() {
        assert_eq!(
            access_level_from_lookup(Ok(Some("admin".into()))),
            AccessLevel::Admin
        );
        assert_eq!(access_level_from_lookup(Ok(None)), AccessLevel::ReadOnly);
        assert_eq!(
            access_level_from_lookup(Err(TabulaError::Schema("no users table".into()))),
            AccessLevel::ReadOnly
        );
    }
}
