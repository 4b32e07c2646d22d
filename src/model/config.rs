use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// 按顺序加载并合并的配置文件（均为可选）
const CONFIG_FILES: &[&str] = &[
    "application.yaml",
    "orm.yaml",
    "security.yaml",
    "parameter.yaml",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

/// 会话 Cookie 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,
    /// 会话有效期（秒）
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    /// 仅通过 HTTPS 发送 Cookie
    #[serde(default)]
    pub secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_session_cookie(),
            ttl_secs: default_session_ttl(),
            secure: false,
        }
    }
}

fn default_session_cookie() -> String {
    "framefox_session".to_string()
}

fn default_session_ttl() -> u64 {
    3600
}

/// CORS 配置，空列表表示不挂载 CORS 层
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Profiler 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerConfig {
    /// 未配置时跟随环境（dev 启用，prod 关闭）
    #[serde(default)]
    pub enabled: Option<bool>,
    /// 内存中保留的最近请求数
    #[serde(default = "default_max_profiles")]
    pub max_profiles: usize,
    /// SQLite 持久化路径（可选）
    #[serde(default)]
    pub storage: Option<String>,
    /// 不采集的路径前缀
    #[serde(default = "default_exclude_paths")]
    pub exclude_paths: Vec<String>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            max_profiles: default_max_profiles(),
            storage: None,
            exclude_paths: default_exclude_paths(),
        }
    }
}

fn default_max_profiles() -> usize {
    100
}

fn default_exclude_paths() -> Vec<String> {
    vec!["/static".to_string(), "/favicon.ico".to_string()]
}

/// `application` 段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default)]
    pub env: Environment,
    /// 未配置时 dev 环境开启调试
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 应用密钥（JWT 签名、CSRF 等）
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// 请求体上限（字节）
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub profiler: ProfilerConfig,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            env: Environment::default(),
            debug: None,
            host: default_host(),
            port: default_port(),
            secret_key: default_secret_key(),
            template_dir: default_template_dir(),
            static_dir: default_static_dir(),
            max_body_size: default_max_body_size(),
            session: SessionConfig::default(),
            cors: CorsConfig::default(),
            profiler: ProfilerConfig::default(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

const DEFAULT_SECRET_KEY: &str = "change-me";

fn default_secret_key() -> String {
    DEFAULT_SECRET_KEY.to_string()
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}

/// `database` 段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite:var/app.db`、`sqlite::memory:` 或直接文件路径
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    /// 以 debug 级别输出每条 SQL
    #[serde(default)]
    pub echo: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            migrations_dir: default_migrations_dir(),
            echo: false,
        }
    }
}

fn default_database_url() -> String {
    "sqlite:var/app.db".to_string()
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

/// 基于实体的用户提供者
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityProviderConfig {
    /// 用户表名
    #[serde(default = "default_user_table")]
    pub table: String,
    /// 作为登录标识的列
    #[serde(default = "default_user_property")]
    pub property: String,
}

fn default_user_table() -> String {
    "user".to_string()
}

fn default_user_property() -> String {
    "email".to_string()
}

/// 内存用户（开发/测试用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUserConfig {
    /// bcrypt 哈希
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub entity: Option<EntityProviderConfig>,
    #[serde(default)]
    pub memory: Option<BTreeMap<String, MemoryUserConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormLoginConfig {
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_target_path")]
    pub default_target_path: String,
    #[serde(default = "default_username_parameter")]
    pub username_parameter: String,
    #[serde(default = "default_password_parameter")]
    pub password_parameter: String,
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_target_path() -> String {
    "/".to_string()
}

fn default_username_parameter() -> String {
    "username".to_string()
}

fn default_password_parameter() -> String {
    "password".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Token 有效期（秒）
    #[serde(default = "default_jwt_ttl")]
    pub ttl_secs: u64,
}

fn default_jwt_ttl() -> u64 {
    60 * 60
}

/// OAuth2 授权码流程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_oauth_start_path")]
    pub start_path: String,
    #[serde(default = "default_oauth_callback_path")]
    pub callback_path: String,
    /// userinfo 响应中作为用户标识的字段
    #[serde(default = "default_user_property")]
    pub identifier_field: String,
    #[serde(default = "default_target_path")]
    pub default_target_path: String,
    #[serde(default = "default_oauth_roles")]
    pub default_roles: Vec<String>,
}

fn default_oauth_start_path() -> String {
    "/connect/oauth".to_string()
}

fn default_oauth_callback_path() -> String {
    "/connect/oauth/check".to_string()
}

fn default_oauth_roles() -> Vec<String> {
    vec!["ROLE_USER".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutConfig {
    #[serde(default = "default_logout_path")]
    pub path: String,
    #[serde(default = "default_target_path")]
    pub target: String,
}

fn default_logout_path() -> String {
    "/logout".to_string()
}

/// 单个防火墙配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// 匹配请求路径的正则
    #[serde(default = "default_firewall_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub provider: Option<String>,
    /// 无状态防火墙不读写会话
    #[serde(default)]
    pub stateless: bool,
    #[serde(default)]
    pub form_login: Option<FormLoginConfig>,
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
    #[serde(default)]
    pub logout: Option<LogoutConfig>,
}

fn default_firewall_pattern() -> String {
    "^/".to_string()
}

/// 访问控制规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRule {
    pub path: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// 为空表示所有方法
    #[serde(default)]
    pub methods: Vec<String>,
}

/// `security` 段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    /// 保持 YAML 中的声明顺序（首个匹配的防火墙生效）
    #[serde(default, deserialize_with = "ordered_firewalls")]
    pub firewalls: Vec<(String, FirewallConfig)>,
    #[serde(default)]
    pub access_control: Vec<AccessRule>,
    #[serde(default = "default_role_hierarchy")]
    pub role_hierarchy: BTreeMap<String, Vec<String>>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            firewalls: Vec::new(),
            access_control: Vec::new(),
            role_hierarchy: default_role_hierarchy(),
        }
    }
}

fn default_role_hierarchy() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([("ROLE_ADMIN".to_string(), vec!["ROLE_USER".to_string()])])
}

fn ordered_firewalls<'de, D>(deserializer: D) -> Result<Vec<(String, FirewallConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
    mapping
        .into_iter()
        .map(|(key, value)| {
            let name = key
                .as_str()
                .ok_or_else(|| serde::de::Error::custom("firewall 名称必须是字符串"))?
                .to_string();
            let firewall: FirewallConfig =
                serde_yaml::from_value(value).map_err(serde::de::Error::custom)?;
            Ok((name, firewall))
        })
        .collect()
}

/// 框架配置（合并后的 config/*.yaml）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_yaml::Value>,

    /// 配置目录（运行时元数据，不参与序列化）
    #[serde(skip)]
    config_dir: Option<PathBuf>,
}

impl Config {
    /// 获取默认配置目录
    pub fn default_config_dir() -> &'static str {
        "config"
    }

    /// 是否为调试模式
    pub fn is_debug(&self) -> bool {
        self.application
            .debug
            .unwrap_or(self.application.env == Environment::Dev)
    }

    /// Profiler 是否启用
    pub fn profiler_enabled(&self) -> bool {
        self.application
            .profiler
            .enabled
            .unwrap_or(self.application.env == Environment::Dev)
    }

    /// 检查 `secret_key`
    ///
    /// 为空或仍是默认值时：调试模式只警告，否则拒绝启动
    pub fn check_secret_key(&self) -> anyhow::Result<()> {
        let key = self.application.secret_key.trim();
        if !key.is_empty() && key != DEFAULT_SECRET_KEY {
            return Ok(());
        }
        if self.is_debug() {
            tracing::warn!("application.secret_key 未设置或仍为默认值，部署前请修改");
            Ok(())
        } else {
            anyhow::bail!("application.secret_key 未设置或仍为默认值，非调试模式下拒绝启动")
        }
    }

    /// 读取 parameters 中的值
    pub fn parameter(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.parameters.get(key)
    }

    /// 从配置目录加载并合并所有 YAML 文件
    ///
    /// 目录或单个文件不存在时使用默认值
    pub fn load<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut merged = serde_yaml::Mapping::new();

        for file in CONFIG_FILES {
            let path = dir.join(file);
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
            let document = parse_document(&raw)
                .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
            // 后加载的文件按顶层键覆盖
            merged.extend(document);
        }

        let mut config: Config = serde_yaml::from_value(serde_yaml::Value::Mapping(merged))
            .context("配置结构无效")?;
        config.config_dir = Some(dir.to_path_buf());
        Ok(config)
    }

    /// 从单个 YAML 文本解析（测试与内嵌配置使用）
    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        let document = parse_document(raw)?;
        Ok(serde_yaml::from_value(serde_yaml::Value::Mapping(document))?)
    }

    /// 获取配置目录（如果有）
    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    /// 以 YAML 输出当前有效配置（密钥脱敏）
    pub fn to_redacted_yaml(&self) -> anyhow::Result<String> {
        let mut copy = self.clone();
        copy.application.secret_key = "***".to_string();
        for (_, firewall) in copy.security.firewalls.iter_mut() {
            if let Some(oauth) = firewall.oauth.as_mut() {
                oauth.client_secret = "***".to_string();
            }
        }
        serde_yaml::to_string(&copy).context("序列化配置失败")
    }
}

fn parse_document(raw: &str) -> anyhow::Result<serde_yaml::Mapping> {
    let substituted = substitute_env(raw);
    let value: serde_yaml::Value = serde_yaml::from_str(&substituted)?;
    match value {
        serde_yaml::Value::Mapping(map) => Ok(map),
        serde_yaml::Value::Null => Ok(serde_yaml::Mapping::new()),
        _ => anyhow::bail!("配置文件顶层必须是映射"),
    }
}

/// 替换 `${VAR}` 与 `${VAR:-default}` 占位符
///
/// 未设置且无默认值的变量替换为空字符串
pub fn substitute_env(raw: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env pattern")
    });

    pattern
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            match std::env::var(&caps[1]) {
                Ok(value) => value,
                Err(_) => {
                    let fallback = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                    if caps.get(2).is_none() {
                        tracing::warn!("环境变量 {} 未设置", &caps[1]);
                    }
                    fallback.to_string()
                }
            }
        })
        .into_owned()
}
