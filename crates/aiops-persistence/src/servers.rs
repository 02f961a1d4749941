use sqlx::Row;

use crate::models::ServerCredential;
use crate::{col_to_enum, enum_to_col, parse_json_map, to_json_string, Store, StoreError};

fn row_to_server(row: &sqlx::sqlite::SqliteRow) -> ServerCredential {
    let api_auth_type: Option<String> = row.get("api_auth_type");
    ServerCredential {
        id: row.get("id"),
        name: row.get("name"),
        protocol: col_to_enum(&row.get::<String, _>("protocol")),
        hostname: row.get("hostname"),
        port: row.get("port"),
        username: row.get("username"),
        os_type: col_to_enum(&row.get::<String, _>("os_type")),
        auth_type: col_to_enum(&row.get::<String, _>("auth_type")),
        secret_material_encrypted: row.get("secret_material_encrypted"),
        tags: parse_json_map(row.get::<String, _>("tags_json").as_str()),
        environment: row.get("environment"),
        winrm_transport: row.get("winrm_transport"),
        api_base_url: row.get("api_base_url"),
        api_auth_type: api_auth_type.map(|raw| col_to_enum(&raw)),
        api_verify_ssl: row.get::<i64, _>("api_verify_ssl") != 0,
        api_timeout_seconds: row.get("api_timeout_seconds"),
    }
}

impl Store {
    pub async fn create_server(&self, server: &ServerCredential) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO server_credentials (id, name, protocol, hostname, port, username, os_type, auth_type, secret_material_encrypted, tags_json, environment, winrm_transport, api_base_url, api_auth_type, api_verify_ssl, api_timeout_seconds)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
        )
        .bind(&server.id)
        .bind(&server.name)
        .bind(enum_to_col(server.protocol))
        .bind(&server.hostname)
        .bind(server.port)
        .bind(&server.username)
        .bind(enum_to_col(server.os_type))
        .bind(enum_to_col(server.auth_type))
        .bind(&server.secret_material_encrypted)
        .bind(to_json_string(&server.tags))
        .bind(&server.environment)
        .bind(&server.winrm_transport)
        .bind(&server.api_base_url)
        .bind(server.api_auth_type.map(enum_to_col))
        .bind(server.api_verify_ssl as i64)
        .bind(server.api_timeout_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_server(&self, id: &str) -> Result<ServerCredential, StoreError> {
        let row = sqlx::query("SELECT * FROM server_credentials WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("server {id}")))?;
        Ok(row_to_server(&row))
    }

    pub async fn list_servers(&self) -> Result<Vec<ServerCredential>, StoreError> {
        let rows = sqlx::query("SELECT * FROM server_credentials ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_server).collect())
    }

    pub async fn delete_server(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM server_credentials WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("server {id}")));
        }
        Ok(())
    }
}
