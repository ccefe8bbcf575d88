use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};

#[derive(Clone)]
pub struct ApiDb {
    client: Arc<Mutex<Client>>,
}

impl ApiDb {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .context("connect to postgres")?;

        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::error!(reason = %error, "api postgres connection error");
            }
        });

        let db = Self {
            client: Arc::new(Mutex::new(client)),
        };
        db.ensure_schema().await?;
        Ok(db)
    }

    async fn ensure_schema(&self) -> Result<()> {
        let client = self.client.lock().await;
        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    title VARCHAR(255) NOT NULL,
                    status VARCHAR(16) NOT NULL DEFAULT 'todo',
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS tasks_user_updated_idx
                    ON tasks (user_id, updated_at DESC);
                "#,
            )
            .await
            .context("apply tasks schema")?;
        Ok(())
    }

    pub fn client(&self) -> Arc<Mutex<Client>> {
        self.client.clone()
    }
}
