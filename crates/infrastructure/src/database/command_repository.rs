use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use taskfarm_core::{
    models::{new_id, now_millis, Command, CommandSpec, CommandState, CommandType},
    traits::CommandRepository,
    SchedulerError, SchedulerResult,
};
use tracing::instrument;
use uuid::Uuid;

use super::mapping::{json_col, to_json, uuid_col};

pub struct SqlxCommandRepository {
    pool: AnyPool,
}

impl SqlxCommandRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    fn row_to_command(row: &AnyRow) -> SchedulerResult<Command> {
        let command_type: String = row.try_get("command_type")?;
        Ok(Command {
            id: uuid_col(row, "id")?,
            command_type: CommandType::parse(&command_type)?,
            args: json_col(row, "args")?,
            state: CommandState::from_ordinal(row.try_get("state")?)?,
            message: row.try_get("message")?,
            time_created: row.try_get("time_created")?,
            time_started: row.try_get("time_started")?,
            time_stopped: row.try_get("time_stopped")?,
        })
    }
}

#[async_trait]
impl CommandRepository for SqlxCommandRepository {
    #[instrument(skip(self, spec), fields(command = spec.command_type.as_str()))]
    async fn create(&self, spec: &CommandSpec) -> SchedulerResult<Command> {
        let command = Command {
            id: new_id(),
            command_type: spec.command_type,
            args: spec.args.clone(),
            state: CommandState::Waiting,
            message: None,
            time_created: now_millis(),
            time_started: -1,
            time_stopped: -1,
        };

        sqlx::query(
            "INSERT INTO command (id, command_type, args, state, message, time_created, \
             time_started, time_stopped) VALUES ($1, $2, $3, $4, NULL, $5, -1, -1)",
        )
        .bind(command.id.to_string())
        .bind(command.command_type.as_str())
        .bind(to_json(&command.args)?)
        .bind(command.state.ordinal())
        .bind(command.time_created)
        .execute(&self.pool)
        .await?;

        Ok(command)
    }

    async fn get(&self, id: Uuid) -> SchedulerResult<Command> {
        let row = sqlx::query(
            "SELECT id, command_type, args, state, message, time_created, time_started, \
             time_stopped FROM command WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SchedulerError::CommandNotFound { id })?;
        Self::row_to_command(&row)
    }

    async fn set_state(
        &self,
        id: Uuid,
        new_state: CommandState,
        message: Option<&str>,
    ) -> SchedulerResult<bool> {
        let time_column = match new_state {
            CommandState::Waiting | CommandState::Running => "time_started",
            CommandState::Finished | CommandState::Cancelled | CommandState::Failure => {
                "time_stopped"
            }
        };
        let time = match new_state {
            CommandState::Waiting => -1,
            _ => now_millis(),
        };
        let sql =
            format!("UPDATE command SET state = $1, message = $2, {time_column} = $3 WHERE id = $4");

        let result = sqlx::query(&sql)
            .bind(new_state.ordinal())
            .bind(message.map(str::to_string))
            .bind(time)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
