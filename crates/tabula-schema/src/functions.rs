//! Generated server-side functions
//!
//! The function bodies are dynamic SQL assembled from the configured
//! column names; they are treated as data here and validated against a
//! live engine in integration testing. Every build step drops any prior
//! definition by name alone (signature changes must not leave an orphaned
//! overload), creates the replacement, and grants it to the project owner.

use tabula_core::{EventOutcome, EventReporter, Result, INTERNAL_TABLE_PREFIX};
use tabula_session::{DbSession, TEMP_RESULTS_TABLE};

use crate::columns::StructureColumns;
use crate::ddl::{owner_command, DatabaseObject};
use crate::internal::InternalTable;

/// Table-category selectors understood by the generated search function.
pub mod search_category {
    pub const ALL: &str = "ALL";
    pub const PROTO: &str = "PROTO";
    pub const DATA: &str = "DATA";
    pub const SCRIPT: &str = "SCRIPT";
}

/// Sort order variants for the structure-introspection functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    ByName,
    ByIndex,
}

impl SortOrder {
    const ALL: [SortOrder; 2] = [SortOrder::ByName, SortOrder::ByIndex];

    fn suffix(&self) -> &'static str {
        match self {
            SortOrder::ByName => "name",
            SortOrder::ByIndex => "index",
        }
    }

    fn sort_column<'a>(&self, columns: &'a StructureColumns) -> &'a str {
        match self {
            SortOrder::ByName => &columns.variable_name,
            SortOrder::ByIndex => &columns.row_index,
        }
    }
}

/// Drop a function whether or not its parameter signature matches, via the
/// `delete_function` helper (which resolves the live signature from the
/// catalog).
fn drop_function(name: &str) -> String {
    format!(
        "SELECT CASE WHEN EXISTS(SELECT * FROM pg_proc WHERE proname = '{name}' \
         AND pg_function_is_visible(oid)) THEN delete_function('{name}') END; "
    )
}

fn ensure_plpgsql_sql(owner: &str) -> String {
    format!(
        "CREATE OR REPLACE FUNCTION make_plpgsql() RETURNS VOID LANGUAGE SQL AS $$ \
         CREATE LANGUAGE plpgsql; $$; \
         SELECT CASE WHEN EXISTS(SELECT 1 FROM pg_catalog.pg_language \
         WHERE lanname = 'plpgsql') THEN NULL ELSE make_plpgsql() END; {}\
         DROP FUNCTION make_plpgsql();",
        owner_command(owner, DatabaseObject::Function, "make_plpgsql()"),
    )
}

fn delete_function_helper_sql(owner: &str) -> String {
    format!(
        "CREATE OR REPLACE FUNCTION delete_function(function_name text) RETURNS VOID AS $$ \
         BEGIN EXECUTE (SELECT 'DROP FUNCTION ' || oid::regproc || '(' || \
         pg_get_function_identity_arguments(oid) || ');' || E'\\n' FROM pg_proc \
         WHERE proname = function_name AND pg_function_is_visible(oid)); END $$ \
         LANGUAGE plpgsql; {}",
        owner_command(
            owner,
            DatabaseObject::Function,
            "delete_function(function_name text)"
        ),
    )
}

fn search_tables_sql(owner: &str) -> String {
    let values_table = InternalTable::Values.table_name();
    let values_suffix = values_table
        .strip_prefix(INTERNAL_TABLE_PREFIX)
        .unwrap_or(&values_table)
        .to_string();
    let scripts_table = InternalTable::Scripts.table_name();

    format!(
        "{drop}CREATE OR REPLACE FUNCTION search_tables(\
         search_text text, no_case boolean, allow_regex boolean, selected_tables text, \
         columns name[] DEFAULT '{{}}', all_schema name[] DEFAULT '{{public}}') \
         RETURNS table(schema_name text, table_name text, column_name text, \
         table_description text, column_value text) AS $$ \
         DECLARE search_text text := CASE WHEN allow_regex THEN search_text \
         ELSE regexp_replace(search_text, E'([^a-zA-Z0-9 ])', E'\\\\\\\\\\\\1', 'g') END; \
         BEGIN FOR schema_name, table_name, table_description, column_name IN \
         SELECT c.table_schema, c.table_name, coalesce(d.description,''), c.column_name \
         FROM information_schema.columns c JOIN information_schema.tables AS t \
         ON (t.table_name = c.table_name AND t.table_schema = c.table_schema), \
         pg_description AS d RIGHT JOIN pg_class ON d.objoid = pg_class.oid \
         RIGHT JOIN pg_namespace ON pg_class.relnamespace = pg_namespace.oid \
         WHERE (selected_tables ~* '{all}' \
         OR (selected_tables ~* '{proto}' AND c.table_name !~ E'^{prefix}.*$') \
         OR (selected_tables ~* '{data}' AND c.table_name !~ E'^{prefix}((?!{values_suffix}).)*$') \
         OR (selected_tables ~* '{script}' AND c.table_name ~ E'^{scripts_table}.*')) \
         AND (array_length(columns, 1) IS NULL OR c.column_name = ANY(columns)) \
         AND c.table_schema = ANY(all_schema) AND t.table_type = 'BASE TABLE' \
         AND relname = t.table_name AND nspname = t.table_schema \
         AND (d.objsubid = '0' OR d.objsubid IS NULL) \
         LOOP DECLARE the_row RECORD; BEGIN \
         FOR the_row IN EXECUTE 'SELECT * FROM ' || quote_ident(schema_name) || '.' || \
         quote_ident(table_name) || ' WHERE (' || quote_nullable(no_case) || \
         ' = ''true'' AND cast(' || quote_ident(column_name) || ' AS text) ~* E''' || \
         search_text || ''') OR (' || quote_nullable(no_case) || ' = ''false'' AND cast(' || \
         quote_ident(column_name) || ' AS text) ~ E''' || search_text || ''')' LOOP \
         SELECT * FROM regexp_replace(the_row::text, E'^\\\\(|(\\\\)$)', '', 'g') \
         INTO column_value; RETURN NEXT; END LOOP; END; END LOOP; END; $$ \
         LANGUAGE plpgsql; {grant}",
        drop = drop_function("search_tables"),
        all = search_category::ALL,
        proto = search_category::PROTO,
        data = search_category::DATA,
        script = search_category::SCRIPT,
        prefix = INTERNAL_TABLE_PREFIX,
        grant = owner_command(
            owner,
            DatabaseObject::Function,
            "search_tables(search_text text, no_case boolean, allow_regex boolean, \
             selected_tables text, columns name[], all_schema name[])"
        ),
    )
}

fn find_prototype_columns_sql(owner: &str) -> String {
    format!(
        "{drop}CREATE OR REPLACE FUNCTION find_prototype_columns_by_name(\
         column_name_db text, table_types text[]) RETURNS \
         table(owner_name text, column_value text) AS $$ \
         BEGIN DECLARE row record; BEGIN DROP TABLE IF EXISTS {temp}; \
         CREATE TEMP TABLE {temp} AS SELECT tbl_name FROM \
         (SELECT split_part(obj_description, ',', 1) AS tbl_name, \
         split_part(obj_description, ',', 2) AS tbl_type FROM \
         (SELECT obj_description(oid) FROM pg_class WHERE relkind = 'r' AND \
         obj_description(oid) != '') AS tbl_desc) AS tbl_name \
         WHERE table_types @> ARRAY[tbl_type] ORDER BY tbl_name ASC; \
         FOR row IN SELECT tbl_name FROM {temp} LOOP \
         IF EXISTS (SELECT 1 FROM information_schema.columns WHERE table_name = \
         lower(row.tbl_name) AND column_name = E'' || column_name_db || E'') THEN \
         RETURN QUERY EXECUTE E'SELECT ''' || row.tbl_name || '''::text, ' || \
         column_name_db || E' FROM ' || row.tbl_name || E' WHERE ' || column_name_db || \
         E' != '''''; END IF; END LOOP; END; END; $$ LANGUAGE plpgsql; {grant}",
        drop = drop_function("find_prototype_columns_by_name"),
        temp = TEMP_RESULTS_TABLE,
        grant = owner_command(
            owner,
            DatabaseObject::Function,
            "find_prototype_columns_by_name(column_name_db text, table_types text[])"
        ),
    )
}

fn find_columns_by_name_sql(owner: &str) -> String {
    format!(
        "{drop}CREATE OR REPLACE FUNCTION find_columns_by_name(\
         column_name_user text, column_name_db text, table_types text[]) RETURNS \
         table(owner_name text, column_value text) AS $$ BEGIN RETURN QUERY EXECUTE \
         E'SELECT owner_name, column_value FROM (SELECT owner_name, column_value FROM \
         find_prototype_columns_by_name(''' || column_name_db || E''', ''' || \
         table_types::text || E''') UNION ALL (SELECT table_path, value FROM {values} \
         WHERE column_name = ''' || column_name_user || E''')) AS name_and_value \
         ORDER BY owner_name;'; END; $$ LANGUAGE plpgsql; {grant}",
        drop = drop_function("find_columns_by_name"),
        values = InternalTable::Values.table_name(),
        grant = owner_command(
            owner,
            DatabaseObject::Function,
            "find_columns_by_name(column_name_user text, column_name_db text, \
             table_types text[])"
        ),
    )
}

fn reset_link_rate_sql(owner: &str) -> String {
    format!(
        "{drop}CREATE FUNCTION reset_link_rate() RETURNS VOID AS $$ \
         BEGIN DECLARE row record; BEGIN DROP TABLE IF EXISTS {temp}; \
         CREATE TEMP TABLE {temp} AS SELECT link_name AS link_defn FROM \
         (SELECT link_name, regexp_replace(member, E'^([0-9])*.*', E'\\\\1') AS rate \
         FROM {links}) AS result WHERE rate != '' AND rate != '0'; \
         FOR row IN SELECT * FROM {temp} LOOP \
         IF EXISTS (SELECT * FROM (SELECT COUNT(*) FROM {links} WHERE \
         link_name = row.link_defn) AS alias1 WHERE count = '1') THEN \
         EXECUTE E'UPDATE {links} SET member = regexp_replace(member, \
         E''^\\\\\\\\d+'', ''0'') WHERE link_name = ''' || row.link_defn || ''''; \
         END IF; END LOOP; END; END; $$ LANGUAGE plpgsql; {grant}",
        drop = drop_function("reset_link_rate"),
        temp = TEMP_RESULTS_TABLE,
        links = InternalTable::Links.table_name(),
        grant = owner_command(owner, DatabaseObject::Function, "reset_link_rate()"),
    )
}

fn update_data_type_names_sql(owner: &str, columns: &StructureColumns) -> String {
    format!(
        "{drop}CREATE FUNCTION update_data_type_names(oldType text, newType text) \
         RETURNS VOID AS $$ BEGIN DECLARE row record; BEGIN \
         DROP TABLE IF EXISTS {temp}; CREATE TEMP TABLE {temp} AS \
         SELECT t.tablename AS real_name FROM pg_tables AS t WHERE \
         t.schemaname = 'public' AND substr(t.tablename, 1, {prefix_len}) != '{prefix}'; \
         FOR row IN SELECT * FROM {temp} LOOP \
         IF EXISTS (SELECT 1 FROM information_schema.columns WHERE table_name = \
         row.real_name AND column_name = '{data_type}') THEN \
         EXECUTE E'UPDATE ' || row.real_name || E' SET {data_type} = ''' || newType || \
         E''' WHERE {data_type} = ''' || oldType || E''''; END IF; \
         END LOOP; END; END; $$ LANGUAGE plpgsql; {grant}",
        drop = drop_function("update_data_type_names"),
        temp = TEMP_RESULTS_TABLE,
        prefix_len = INTERNAL_TABLE_PREFIX.len(),
        prefix = INTERNAL_TABLE_PREFIX,
        data_type = columns.data_type,
        grant = owner_command(
            owner,
            DatabaseObject::Function,
            "update_data_type_names(oldType text, newType text)"
        ),
    )
}

fn table_members_sql(order: SortOrder, columns: &StructureColumns, owner: &str) -> String {
    let suffix = order.suffix();
    format!(
        "{drop}CREATE FUNCTION get_table_members_by_{suffix}() RETURNS TABLE(\
         tbl_name text, data_type text, variable_name text, bit_length text, \
         rate text, enumeration text) AS $$ BEGIN DECLARE row record; BEGIN \
         DROP TABLE IF EXISTS {temp}; CREATE TEMP TABLE {temp} AS \
         SELECT t.tablename AS real_name FROM pg_tables AS t WHERE \
         t.schemaname = 'public' AND substr(t.tablename, 1, {prefix_len}) != '{prefix}' \
         ORDER BY real_name ASC; FOR row IN SELECT * FROM {temp} LOOP \
         IF EXISTS (SELECT * FROM (SELECT COUNT(*) FROM information_schema.columns \
         WHERE table_name = row.real_name AND ({compare})) AS alias1 \
         WHERE count = '{required}') THEN RETURN QUERY EXECUTE E'SELECT ''' || \
         row.real_name || '''::text, * FROM get_def_columns_by_{suffix}(''' || \
         row.real_name || ''')'; END IF; END LOOP; END; END; $$ LANGUAGE plpgsql; {grant}",
        drop = drop_function(&format!("get_table_members_by_{suffix}")),
        temp = TEMP_RESULTS_TABLE,
        prefix_len = INTERNAL_TABLE_PREFIX.len(),
        prefix = INTERNAL_TABLE_PREFIX,
        compare = columns.compare_columns(),
        required = columns.required_column_count(),
        grant = owner_command(
            owner,
            DatabaseObject::Function,
            &format!("get_table_members_by_{suffix}()")
        ),
    )
}

/// Per-column existence probe and projection used by the def-columns
/// functions. A configured column that does not exist on a given table
/// yields an empty value rather than an error.
fn probed_column_expr(column_names: &[String]) -> (String, String) {
    if column_names.is_empty() {
        return ("''''::text".to_string(), String::new());
    }

    let projection = column_names
        .iter()
        .map(|col| format!("CASE WHEN {col}_exists THEN {col}::text ELSE ''''::text END"))
        .collect::<Vec<_>>()
        .join(" || '','' || ");

    let joins = column_names
        .iter()
        .map(|col| {
            format!(
                " CROSS JOIN (SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_attribute \
                 WHERE attrelid = ''' || name || '''::regclass AND attname = ''{col}'' \
                 AND NOT attisdropped AND attnum > 0) AS {col}_exists) {col}"
            )
        })
        .collect::<Vec<_>>()
        .join("");

    (projection, joins)
}

fn def_columns_sql(order: SortOrder, columns: &StructureColumns, owner: &str) -> String {
    let suffix = order.suffix();
    let (rate_expr, rate_joins) = probed_column_expr(&columns.rates);
    let (enum_expr, enum_joins) = probed_column_expr(&columns.enumerations);

    format!(
        "{drop}CREATE FUNCTION get_def_columns_by_{suffix}(name text) RETURNS TABLE(\
         data_type text, variable_name text, bit_length text, rate text, \
         enumeration text) AS $$ BEGIN RETURN QUERY EXECUTE 'SELECT {data_type}, \
         {variable_name}, {bit_length}, {rate_expr}, {enum_expr} FROM ' || name || \
         '{rate_joins}{enum_joins} WHERE {array_size} = E'''' OR {variable_name} ~ \
         E''^.+]'' ORDER BY {sort} ASC'; END $$ LANGUAGE plpgsql; {grant}",
        drop = drop_function(&format!("get_def_columns_by_{suffix}")),
        data_type = columns.data_type,
        variable_name = columns.variable_name,
        bit_length = columns.bit_length,
        array_size = columns.array_size,
        sort = order.sort_column(columns),
        grant = owner_command(
            owner,
            DatabaseObject::Function,
            &format!("get_def_columns_by_{suffix}(name text)")
        ),
    )
}

/// Builds the internal tables and the full generated-function catalog.
pub struct FunctionBuilder<'a> {
    session: &'a DbSession,
    reporter: &'a dyn EventReporter,
    owner: String,
}

impl<'a> FunctionBuilder<'a> {
    pub fn new(session: &'a DbSession, reporter: &'a dyn EventReporter) -> Self {
        let owner = session.active_owner().to_string();
        Self {
            session,
            reporter,
            owner,
        }
    }

    /// Create the internal tables and the utility functions that do not
    /// depend on the structure column configuration. Run on first open.
    #[tracing::instrument(skip(self))]
    pub async fn create_tables_and_functions(&self) -> Result<()> {
        self.session
            .execute_update(&ensure_plpgsql_sql(&self.owner))
            .await?;
        self.session
            .execute_update(&delete_function_helper_sql(&self.owner))
            .await?;

        for table in InternalTable::ALL {
            if !table.created_at_open() {
                continue;
            }
            if !self.session.table_exists(&table.table_name()).await? {
                self.session
                    .execute_update(&table.build_command(&self.owner))
                    .await?;
            }
        }

        for sql in [
            search_tables_sql(&self.owner),
            find_prototype_columns_sql(&self.owner),
            find_columns_by_name_sql(&self.owner),
            reset_link_rate_sql(&self.owner),
        ] {
            self.session.execute_update(&sql).await?;
        }

        self.reporter
            .report(EventOutcome::Success, "Database tables and functions created");
        Ok(())
    }

    /// Create the structure-introspection functions tailored to the
    /// configured rate and enumeration columns. Idempotent; the dropped
    /// and recreated pair never coexists with an older version.
    #[tracing::instrument(skip(self, columns))]
    pub async fn create_structure_functions(&self, columns: &StructureColumns) -> Result<()> {
        if !self.session.is_project_connected() {
            return Err(tabula_core::TabulaError::Schema(
                "structure functions require an open project".into(),
            ));
        }

        for order in SortOrder::ALL {
            self.session
                .execute_update(&table_members_sql(order, columns, &self.owner))
                .await?;
        }
        for order in SortOrder::ALL {
            self.session
                .execute_update(&def_columns_sql(order, columns, &self.owner))
                .await?;
        }
        self.session
            .execute_update(&update_data_type_names_sql(&self.owner, columns))
            .await?;

        self.reporter
            .report(EventOutcome::Success, "Database structure functions created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_function_targets_any_signature() {
        let sql = drop_function("search_tables");
        assert!(sql.contains("proname = 'search_tables'"));
        assert!(sql.contains("delete_function('search_tables')"));
    }

    #[test]
    fn test_search_tables_filters_by_category() {
        let sql = search_tables_sql("flight_group");
        assert!(sql.contains("selected_tables ~* 'ALL'"));
        assert!(sql.contains("selected_tables ~* 'PROTO'"));
        assert!(sql.contains("c.table_name !~ E'^__.*$'"));
        assert!(sql.contains("OWNER TO flight_group"));
    }

    #[test]
    fn test_def_columns_probe_every_configured_column() {
        let columns = StructureColumns {
            rates: vec!["rate_hk".into(), "rate_sci".into()],
            ..Default::default()
        };
        let sql = def_columns_sql(SortOrder::ByName, &columns, "owner_role");
        assert!(sql.contains("AS rate_hk_exists"));
        assert!(sql.contains("AS rate_sci_exists"));
        assert!(sql.contains("CASE WHEN rate_hk_exists THEN rate_hk::text"));
        assert!(sql.contains("ORDER BY variable_name ASC"));
    }

    #[test]
    fn test_def_columns_without_rates_yields_blank() {
        let columns = StructureColumns {
            rates: Vec::new(),
            ..Default::default()
        };
        let sql = def_columns_sql(SortOrder::ByIndex, &columns, "owner_role");
        assert!(sql.contains("''''::text"));
        assert!(sql.contains("ORDER BY row_index ASC"));
    }

    #[test]
    fn test_table_members_checks_required_count() {
        let columns = StructureColumns::default();
        let sql = table_members_sql(SortOrder::ByName, &columns, "owner_role");
        assert!(sql.contains("WHERE count = '6'"));
        assert!(sql.contains("get_def_columns_by_name"));
        assert!(sql.contains("substr(t.tablename, 1, 2) != '__'"));
    }

    #[test]
    fn test_each_function_dropped_before_created() {
        for sql in [
            search_tables_sql("o"),
            find_prototype_columns_sql("o"),
            find_columns_by_name_sql("o"),
            reset_link_rate_sql("o"),
            update_data_type_names_sql("o", &StructureColumns::default()),
        ] {
            let drop_at = sql.find("delete_function(").expect("drop present");
            let create_at = sql.find("CREATE").expect("create present");
            assert!(drop_at < create_at || sql.starts_with("SELECT CASE"));
        }
    }

    #[test]
    fn test_find_columns_unions_custom_values() {
        let sql = find_columns_by_name_sql("o");
        assert!(sql.contains("UNION ALL (SELECT table_path, value FROM __values"));
    }
}
