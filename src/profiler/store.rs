//! Profile 存储
//!
//! 内存中保留最近 N 条；配置了 `storage` 时由后台任务批量写入 SQLite

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use tokio::sync::mpsc;

use super::model::Profile;
use super::types::{ProfileListResponse, ProfileQuery};

/// 写入通道容量
const CHANNEL_CAPACITY: usize = 10_000;
/// 单批最多写入条数
const MAX_BATCH: usize = 500;

/// 底层 SQLite 存储（同步）
struct ProfileDb {
    conn: Mutex<Connection>,
}

impl ProfileDb {
    fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("创建 profiler 存储目录失败: {}", parent.display()))?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS profiles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                path TEXT NOT NULL,
                route TEXT,
                status_code INTEGER NOT NULL,
                ip TEXT,
                duration_ms REAL NOT NULL DEFAULT 0,
                panels TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_profiles_timestamp ON profiles(timestamp);
            CREATE INDEX IF NOT EXISTS idx_profiles_status ON profiles(status_code);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert_batch(&self, profiles: &[Arc<Profile>]) -> Result<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        for profile in profiles {
            tx.execute(
                "INSERT OR REPLACE INTO profiles (token, timestamp, method, url, path, route, status_code, ip, duration_ms, panels)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    profile.token,
                    profile.timestamp,
                    profile.method,
                    profile.url,
                    profile.path,
                    profile.route,
                    profile.status_code as i32,
                    profile.ip,
                    profile.duration_ms,
                    serde_json::to_string(&profile.panels)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Profile, String)> {
        Ok((
            Profile {
                token: row.get(0)?,
                timestamp: row.get(1)?,
                method: row.get(2)?,
                url: row.get(3)?,
                path: row.get(4)?,
                route: row.get(5)?,
                status_code: row.get::<_, i32>(6)? as u16,
                ip: row.get(7)?,
                duration_ms: row.get(8)?,
                panels: Default::default(),
            },
            row.get(9)?,
        ))
    }

    fn get(&self, token: &str) -> Result<Option<Profile>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT token, timestamp, method, url, path, route, status_code, ip, duration_ms, panels
             FROM profiles WHERE token = ?1",
        )?;
        let mut rows = stmt.query_map([token], Self::row_to_profile)?;
        match rows.next() {
            Some(row) => {
                let (mut profile, panels) = row?;
                profile.panels = serde_json::from_str(&panels)?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    fn query(&self, filter: &ProfileQuery) -> Result<ProfileListResponse> {
        let conn = self.conn.lock();
        let page = filter.page();
        let page_size = filter.page_size();
        let offset = (page - 1) * page_size;

        let mut where_clauses = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref method) = filter.method {
            where_clauses.push(format!("method = ?{}", params.len() + 1));
            params.push(Box::new(method.to_uppercase()));
        }
        if let Some(ref status) = filter.status {
            match status.as_str() {
                "success" => {
                    where_clauses.push(format!("status_code < ?{}", params.len() + 1));
                    params.push(Box::new(400i32));
                }
                "error" => {
                    where_clauses.push(format!("status_code >= ?{}", params.len() + 1));
                    params.push(Box::new(400i32));
                }
                _ => {}
            }
        }
        if let Some(ref path) = filter.path {
            where_clauses.push(format!("instr(path, ?{}) > 0", params.len() + 1));
            params.push(Box::new(path.clone()));
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM profiles {}", where_sql);
        let total: u64 = conn.query_row(
            &count_sql,
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            |row| row.get(0),
        )?;

        let query_sql = format!(
            "SELECT token, timestamp, method, url, path, route, status_code, ip, duration_ms, panels
             FROM profiles {} ORDER BY id DESC LIMIT ?{} OFFSET ?{}",
            where_sql,
            params.len() + 1,
            params.len() + 2
        );
        params.push(Box::new(page_size as i64));
        params.push(Box::new(offset as i64));

        let mut stmt = conn.prepare(&query_sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                Self::row_to_profile,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (mut profile, panels) in rows {
            profile.panels = serde_json::from_str(&panels).unwrap_or_default();
            records.push(profile.summary());
        }

        Ok(ProfileListResponse {
            total,
            page,
            page_size,
            records,
        })
    }

    fn clear(&self) -> Result<u64> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM profiles", [])? as u64)
    }
}

/// Profile 存储（公开 API）
pub struct ProfileStore {
    recent: RwLock<VecDeque<Arc<Profile>>>,
    max_profiles: usize,
    sender: Option<mpsc::Sender<Arc<Profile>>>,
    db: Option<Arc<ProfileDb>>,
}

impl ProfileStore {
    /// 仅内存存储
    pub fn in_memory(max_profiles: usize) -> Self {
        Self {
            recent: RwLock::new(VecDeque::with_capacity(max_profiles.min(1024))),
            max_profiles: max_profiles.max(1),
            sender: None,
            db: None,
        }
    }

    /// 创建存储；给出 `storage` 时启动后台批量写入任务（需要在 tokio 运行时内调用）
    pub fn new(max_profiles: usize, storage: Option<&str>) -> Result<Self> {
        let mut store = Self::in_memory(max_profiles);
        let Some(path) = storage else {
            return Ok(store);
        };

        let db = Arc::new(ProfileDb::new(path)?);
        let (sender, mut receiver) = mpsc::channel::<Arc<Profile>>(CHANNEL_CAPACITY);

        let write_db = db.clone();
        tokio::spawn(async move {
            while let Some(first) = receiver.recv().await {
                let mut batch = vec![first];
                while let Ok(profile) = receiver.try_recv() {
                    batch.push(profile);
                    if batch.len() >= MAX_BATCH {
                        break;
                    }
                }
                let db = write_db.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    if let Err(e) = db.insert_batch(&batch) {
                        tracing::error!("批量写入 profile 失败: {}", e);
                    }
                })
                .await;
            }
        });

        tracing::info!("Profiler 持久化已启用: {}", path);
        store.sender = Some(sender);
        store.db = Some(db);
        Ok(store)
    }

    /// 非阻塞记录
    pub fn record(&self, profile: Profile) {
        let profile = Arc::new(profile);
        {
            let mut recent = self.recent.write();
            recent.push_back(profile.clone());
            while recent.len() > self.max_profiles {
                recent.pop_front();
            }
        }
        if let Some(sender) = &self.sender {
            if sender.try_send(profile).is_err() {
                tracing::warn!("Profile 写入通道已满，丢弃持久化记录");
            }
        }
    }

    fn find_recent(&self, token: &str) -> Option<Arc<Profile>> {
        self.recent
            .read()
            .iter()
            .rev()
            .find(|p| p.token == token)
            .cloned()
    }

    /// 按 token 查找（先查内存，再查持久化存储）
    pub async fn get(&self, token: &str) -> Result<Option<Arc<Profile>>> {
        if let Some(profile) = self.find_recent(token) {
            return Ok(Some(profile));
        }
        let Some(db) = self.db.clone() else {
            return Ok(None);
        };
        let token = token.to_string();
        let profile = tokio::task::spawn_blocking(move || db.get(&token)).await??;
        Ok(profile.map(Arc::new))
    }

    /// 分页查询（有持久化时查询 SQLite，否则查询内存）
    pub async fn query(&self, filter: ProfileQuery) -> Result<ProfileListResponse> {
        if let Some(db) = self.db.clone() {
            return tokio::task::spawn_blocking(move || db.query(&filter)).await?;
        }

        let page = filter.page();
        let page_size = filter.page_size();
        let recent = self.recent.read();
        let matched: Vec<&Arc<Profile>> = recent.iter().rev().filter(|p| filter.matches(p)).collect();
        let records = matched
            .iter()
            .skip(((page - 1) * page_size) as usize)
            .take(page_size as usize)
            .map(|p| p.summary())
            .collect();
        Ok(ProfileListResponse {
            total: matched.len() as u64,
            page,
            page_size,
            records,
        })
    }

    /// 清空记录，返回清除的条数
    pub async fn clear(&self) -> Result<u64> {
        let in_memory = {
            let mut recent = self.recent.write();
            let n = recent.len() as u64;
            recent.clear();
            n
        };
        match self.db.clone() {
            Some(db) => tokio::task::spawn_blocking(move || db.clear()).await?,
            None => Ok(in_memory),
        }
    }

    pub fn len(&self) -> usize {
        self.recent.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.read().is_empty()
    }
}
