//! 表结构
//!
//! 只使用 PostgreSQL 与 SQLite 都支持的语法，两种后端执行同一组语句。

pub(crate) const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS job (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        data_source_id TEXT,
        name TEXT NOT NULL,
        state BIGINT NOT NULL DEFAULT 0,
        priority BIGINT NOT NULL DEFAULT 100,
        paused BIGINT NOT NULL DEFAULT 0,
        time_pause_expired BIGINT NOT NULL DEFAULT -1,
        max_running_tasks BIGINT NOT NULL,
        depend_count BIGINT NOT NULL DEFAULT 0,
        args TEXT NOT NULL,
        env TEXT NOT NULL,
        time_created BIGINT NOT NULL,
        time_modified BIGINT NOT NULL,
        time_started BIGINT NOT NULL DEFAULT -1,
        time_stopped BIGINT NOT NULL DEFAULT -1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_count (
        job_id TEXT PRIMARY KEY,
        waiting BIGINT NOT NULL DEFAULT 0,
        running BIGINT NOT NULL DEFAULT 0,
        success BIGINT NOT NULL DEFAULT 0,
        failure BIGINT NOT NULL DEFAULT 0,
        skipped BIGINT NOT NULL DEFAULT 0,
        queued BIGINT NOT NULL DEFAULT 0,
        depend BIGINT NOT NULL DEFAULT 0,
        total BIGINT NOT NULL DEFAULT 0,
        time_updated BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_stat (
        job_id TEXT PRIMARY KEY,
        asset_total BIGINT NOT NULL DEFAULT 0,
        asset_errors BIGINT NOT NULL DEFAULT 0,
        asset_warnings BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL,
        parent_id TEXT,
        name TEXT NOT NULL,
        state BIGINT NOT NULL DEFAULT 0,
        host TEXT,
        run_count BIGINT NOT NULL DEFAULT 0,
        progress BIGINT NOT NULL DEFAULT 0,
        exit_status BIGINT NOT NULL DEFAULT -1,
        script TEXT NOT NULL,
        depend_count BIGINT NOT NULL DEFAULT 0,
        time_created BIGINT NOT NULL,
        time_modified BIGINT NOT NULL,
        time_started BIGINT NOT NULL DEFAULT -1,
        time_stopped BIGINT NOT NULL DEFAULT -1,
        time_ping BIGINT NOT NULL DEFAULT -1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_stat (
        task_id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL,
        asset_total BIGINT NOT NULL DEFAULT 0,
        asset_errors BIGINT NOT NULL DEFAULT 0,
        asset_warnings BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_error (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL,
        job_id TEXT NOT NULL,
        endpoint TEXT,
        message TEXT NOT NULL,
        path TEXT,
        processor TEXT,
        phase TEXT,
        fatal BIGINT NOT NULL DEFAULT 0,
        stack_trace TEXT NOT NULL,
        time_created BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS analyst (
        id TEXT PRIMARY KEY,
        endpoint TEXT NOT NULL UNIQUE,
        task_id TEXT,
        total_ram BIGINT NOT NULL DEFAULT 0,
        free_ram BIGINT NOT NULL DEFAULT 0,
        free_disk BIGINT NOT NULL DEFAULT 0,
        cpu_load DOUBLE PRECISION NOT NULL DEFAULT 0,
        state BIGINT NOT NULL DEFAULT 0,
        lock_state BIGINT NOT NULL DEFAULT 0,
        version TEXT NOT NULL,
        time_created BIGINT NOT NULL,
        time_ping BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS depend (
        id TEXT PRIMARY KEY,
        depend_type BIGINT NOT NULL,
        state BIGINT NOT NULL DEFAULT 0,
        depender_job_id TEXT NOT NULL,
        dependee_job_id TEXT NOT NULL,
        depender_task_id TEXT,
        dependee_task_id TEXT,
        time_created BIGINT NOT NULL,
        time_modified BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cluster_lock (
        name TEXT PRIMARY KEY,
        host TEXT NOT NULL,
        combine_count BIGINT NOT NULL DEFAULT 0,
        time_locked BIGINT NOT NULL,
        time_expired BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS command (
        id TEXT PRIMARY KEY,
        command_type TEXT NOT NULL,
        args TEXT NOT NULL,
        state BIGINT NOT NULL DEFAULT 0,
        message TEXT,
        time_created BIGINT NOT NULL,
        time_started BIGINT NOT NULL DEFAULT -1,
        time_stopped BIGINT NOT NULL DEFAULT -1
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_task_job ON task (job_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_dispatch ON task (state, depend_count)",
    "CREATE INDEX IF NOT EXISTS idx_task_ping ON task (state, time_ping)",
    "CREATE INDEX IF NOT EXISTS idx_job_state ON job (state, paused)",
    "CREATE INDEX IF NOT EXISTS idx_job_project ON job (project_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_error_task ON task_error (task_id)",
    "CREATE INDEX IF NOT EXISTS idx_depend_dependee_job ON depend (dependee_job_id, state)",
    "CREATE INDEX IF NOT EXISTS idx_depend_dependee_task ON depend (dependee_task_id, state)",
    "CREATE INDEX IF NOT EXISTS idx_analyst_ping ON analyst (state, time_ping)",
];
