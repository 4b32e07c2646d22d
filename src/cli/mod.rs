//! 命令行入口
//!
//! 应用在 `main` 中通过 [`run`] 注册控制器与实体，其余命令共享同一份配置

mod database;
mod debug;
mod generator;

pub use generator::{AuthKind, FieldSpec, Generator};

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::kernel::{Application, ApplicationBuilder};
use crate::model::config::Config;
use crate::orm::Database;
use crate::profiler::ProfilerLayer;

#[derive(Parser, Debug)]
#[command(name = "framefox", version, about = "Framefox 应用命令行")]
pub struct Cli {
    /// 配置目录
    #[arg(long, global = true, default_value = Config::default_config_dir())]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 启动开发服务器
    Run {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// 生成代码
    Create {
        /// 覆盖已存在的文件
        #[arg(long, global = true)]
        force: bool,
        #[command(subcommand)]
        command: CreateCommand,
    },
    /// 数据库与迁移
    Database {
        #[command(subcommand)]
        command: DatabaseCommand,
    },
    Debug {
        #[command(subcommand)]
        command: DebugCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum CreateCommand {
    /// 控制器与 index/show 模板
    Controller { name: String },
    /// 实体（`--field title:string --field score:int:nullable`）
    Entity {
        name: String,
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    Form {
        name: String,
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    /// 增删改查控制器、模板（缺少时连同实体与表单）
    Crud {
        name: String,
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    /// `User` 实体
    User,
    /// 登录控制器与 security.yaml
    Auth {
        #[arg(long, value_enum, default_value_t = AuthKind::Form)]
        kind: AuthKind,
    },
}

#[derive(Subcommand, Debug)]
pub enum DatabaseCommand {
    /// 为已注册实体建表
    Create,
    /// 对比实体与数据库生成迁移
    CreateMigration {
        #[arg(default_value = "auto")]
        name: String,
    },
    Upgrade,
    Downgrade {
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },
    Status,
}

#[derive(Subcommand, Debug)]
pub enum DebugCommand {
    /// 打印路由表
    Router,
    /// 打印当前有效配置（密钥脱敏）
    Config,
}

/// 初始化日志：`RUST_LOG` 优先，否则调试模式为 debug、其余为 info
pub fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(ProfilerLayer)
        .try_init();
}

/// 解析命令行并执行
pub async fn run<F>(configure: F) -> anyhow::Result<()>
where
    F: FnOnce(ApplicationBuilder) -> ApplicationBuilder,
{
    let cli = Cli::parse();
    let config = Config::load(&cli.config_dir)
        .with_context(|| format!("加载配置失败: {}", cli.config_dir.display()))?;
    init_tracing(config.is_debug());
    execute(cli.command, configure(Application::builder(config))).await
}

pub async fn execute(command: Commands, builder: ApplicationBuilder) -> anyhow::Result<()> {
    match command {
        Commands::Run { host, port } => {
            let host = host.unwrap_or_else(|| builder.config().application.host.clone());
            let port = port.unwrap_or(builder.config().application.port);
            builder.build()?.serve_on(&host, port).await
        }
        Commands::Create { force, command } => {
            let root = std::env::current_dir().context("无法获取当前目录")?;
            let written = create(&Generator::new(root, force), command)?;
            for path in written {
                println!("已生成 {}", path.display());
            }
            Ok(())
        }
        Commands::Database { command } => {
            let config = builder.config();
            let db = Database::open(&config.database.url, config.database.echo)?;
            let dir = &config.database.migrations_dir;
            let schemas = builder.schemas();
            let output = match command {
                DatabaseCommand::Create => database::create(&db, schemas)?,
                DatabaseCommand::CreateMigration { name } => {
                    database::create_migration(&db, dir, schemas, &name)?
                }
                DatabaseCommand::Upgrade => database::upgrade(&db, dir)?,
                DatabaseCommand::Downgrade { steps } => database::downgrade(&db, dir, steps)?,
                DatabaseCommand::Status => database::status(&db, dir)?,
            };
            println!("{}", output);
            Ok(())
        }
        Commands::Debug { command } => {
            let output = match command {
                DebugCommand::Router => debug::format_routes(&builder.route_table()?),
                DebugCommand::Config => builder.config().to_redacted_yaml()?,
            };
            println!("{}", output);
            Ok(())
        }
    }
}

fn create(generator: &Generator, command: CreateCommand) -> anyhow::Result<Vec<PathBuf>> {
    let parse_fields = |fields: &[String]| -> anyhow::Result<Vec<FieldSpec>> {
        fields.iter().map(|f| FieldSpec::parse(f)).collect()
    };
    match command {
        CreateCommand::Controller { name } => generator.controller(&name),
        CreateCommand::Entity { name, fields } => generator.entity(&name, &parse_fields(&fields)?),
        CreateCommand::Form { name, fields } => generator.form(&name, &parse_fields(&fields)?),
        CreateCommand::Crud { name, fields } => generator.crud(&name, &parse_fields(&fields)?),
        CreateCommand::User => generator.user(),
        CreateCommand::Auth { kind } => generator.auth(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from([
            "framefox",
            "create",
            "entity",
            "Game",
            "--field",
            "title:string",
            "--field",
            "score:int:nullable",
            "--force",
        ])
        .unwrap();
        assert_eq!(cli.config_dir, PathBuf::from("config"));
        match cli.command {
            Commands::Create {
                force: true,
                command: CreateCommand::Entity { name, fields },
            } => {
                assert_eq!(name, "Game");
                assert_eq!(fields, vec!["title:string", "score:int:nullable"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cli = Cli::try_parse_from(["framefox", "database", "downgrade", "--steps", "2"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Database {
                command: DatabaseCommand::Downgrade { steps: 2 }
            }
        ));

        let cli = Cli::try_parse_from(["framefox", "create", "auth", "--kind", "jwt"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Create {
                command: CreateCommand::Auth { kind: AuthKind::Jwt },
                ..
            }
        ));

        assert!(Cli::try_parse_from(["framefox", "create", "auth", "--kind", "saml"]).is_err());
    }

    struct Account {
        id: Option<i64>,
        email: String,
    }

    impl crate::orm::Entity for Account {
        fn table_name() -> &'static str {
            "account"
        }

        fn columns() -> Vec<crate::orm::Column> {
            vec![crate::orm::Column::new("email", crate::orm::ColumnType::Text)]
        }

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = Some(id);
        }

        fn to_values(&self) -> Vec<(&'static str, crate::orm::SqlValue)> {
            vec![("email", self.email.clone().into())]
        }

        fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get("id")?,
                email: row.get("email")?,
            })
        }
    }

    #[tokio::test]
    async fn test_database_commands_use_registered_entities() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "database:\n  url: sqlite:{}\n  migrations_dir: {}\n",
            dir.path().join("app.db").display(),
            dir.path().join("migrations").display()
        );
        let config = Config::from_yaml_str(&yaml).unwrap();
        let builder = Application::builder(config).entity::<Account>();
        execute(
            Commands::Database {
                command: DatabaseCommand::CreateMigration { name: "init".into() },
            },
            builder,
        )
        .await
        .unwrap();
        let files: Vec<_> = std::fs::read_dir(dir.path().join("migrations")).unwrap().collect();
        assert_eq!(files.len(), 1);

        let builder = Application::builder(Config::from_yaml_str(&yaml).unwrap()).entity::<Account>();
        execute(
            Commands::Database {
                command: DatabaseCommand::Upgrade,
            },
            builder,
        )
        .await
        .unwrap();
        let db = Database::open(&format!("sqlite:{}", dir.path().join("app.db").display()), false).unwrap();
        assert_eq!(db.table_columns("account").unwrap().len(), 2);
    }
}
