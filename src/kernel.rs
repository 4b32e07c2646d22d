//! 应用内核
//!
//! 汇总控制器、实体、安全与 profiler，构建共享状态与中间件栈：
//! profiler（最外层）→ 错误页 → body 限制 → CORS → 安全 → 控制器

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    response::Html,
};
use serde::Serialize;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    services::ServeDir,
};

use crate::error::{ErrorPages, FrameworkError, error_page_middleware};
use crate::model::config::{Config, CorsConfig};
use crate::orm::{Database, Entity, EntityManager, Repository, TableSchema};
use crate::profiler::{Collector, Profiler, create_profiler_router, profiler_middleware};
use crate::routing::{Controller, RouteTable, Routes};
use crate::security::{Authenticator, Security, SecurityExtensions, SessionStore, UserProvider, security_middleware};
use crate::templating::TemplateRenderer;

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub routes: Arc<RouteTable>,
    pub templates: Arc<TemplateRenderer>,
    pub db: EntityManager,
    pub security: Arc<Security>,
    pub sessions: Arc<SessionStore>,
    pub profiler: Option<Arc<Profiler>>,
}

impl AppState {
    pub fn repository<T: Entity>(&self) -> Repository<T> {
        self.db.repository()
    }

    /// 渲染模板为 HTML 响应
    pub fn render<C: Serialize>(&self, name: &str, context: C) -> Result<Html<String>, FrameworkError> {
        self.templates.render_html(name, context)
    }

    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String, FrameworkError> {
        let params = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.routes
            .url_for(name, &params)
            .map_err(|e| FrameworkError::Internal(e.into()))
    }
}

/// 应用构建器
pub struct ApplicationBuilder {
    config: Config,
    controllers: Vec<Box<dyn Controller>>,
    schemas: Vec<TableSchema>,
    security: SecurityExtensions,
    collectors: Vec<Box<dyn Collector>>,
    database: Option<Database>,
}

impl ApplicationBuilder {
    pub fn controller(mut self, controller: impl Controller) -> Self {
        self.controllers.push(Box::new(controller));
        self
    }

    /// 注册实体（`database create` 与迁移生成使用其表结构）
    pub fn entity<T: Entity>(mut self) -> Self {
        let schema = T::schema();
        self.schemas.retain(|s| s.name != schema.name);
        self.schemas.push(schema);
        self
    }

    /// 为防火墙追加自定义认证器
    pub fn authenticator(mut self, firewall: impl Into<String>, authenticator: Arc<dyn Authenticator>) -> Self {
        self.security.authenticators.push((firewall.into(), authenticator));
        self
    }

    pub fn user_provider(mut self, name: impl Into<String>, provider: Arc<dyn UserProvider>) -> Self {
        self.security.providers.insert(name.into(), provider);
        self
    }

    /// 追加 profiler 面板
    pub fn collector(mut self, collector: Box<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    /// 使用已打开的数据库（默认按 `database.url` 打开）
    pub fn database(mut self, db: Database) -> Self {
        self.database = Some(db);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schemas(&self) -> &[TableSchema] {
        &self.schemas
    }

    fn collect_routes(&self) -> anyhow::Result<(Router<AppState>, RouteTable)> {
        let mut routes: Routes<AppState> = Routes::new();
        for controller in &self.controllers {
            routes.set_controller(controller.name());
            controller.routes(&mut routes);
        }
        let (router, entries) = routes.into_parts().context("注册路由失败")?;
        let table = RouteTable::new(entries).context("构建路由表失败")?;
        Ok((router, table))
    }

    /// 只收集路由，不打开数据库（`debug router` 使用）
    pub fn route_table(&self) -> anyhow::Result<RouteTable> {
        Ok(self.collect_routes()?.1)
    }

    pub fn build(self) -> anyhow::Result<Application> {
        self.config.check_secret_key()?;
        let (app_router, route_table) = self.collect_routes()?;
        let route_table = Arc::new(route_table);
        let config = Arc::new(self.config);

        let templates = Arc::new(TemplateRenderer::new(
            &config.application.template_dir,
            route_table.clone(),
        ));
        let db = match self.database {
            Some(db) => db,
            None => Database::open(&config.database.url, config.database.echo)?,
        };
        let sessions = Arc::new(SessionStore::new(&config.application.session));
        let security = Arc::new(
            Security::from_config(&config, &db, sessions.clone(), self.security).context("加载安全配置失败")?,
        );

        let profiler = if config.profiler_enabled() {
            let mut profiler = Profiler::new(&config.application.profiler, route_table.clone())?;
            for collector in self.collectors {
                profiler = profiler.with_collector(collector);
            }
            Some(Arc::new(profiler))
        } else {
            None
        };

        let state = AppState {
            config: config.clone(),
            routes: route_table,
            templates: templates.clone(),
            db: EntityManager::new(db),
            security: security.clone(),
            sessions,
            profiler: profiler.clone(),
        };

        let mut router = app_router
            .nest_service("/static", ServeDir::new(&config.application.static_dir))
            .fallback(|| async { FrameworkError::not_found("No route found") })
            .with_state(state.clone())
            .layer(middleware::from_fn_with_state(security, security_middleware));

        if let Some(cors) = cors_layer(&config.application.cors)? {
            router = router.layer(cors);
        }

        let max_body_size = config.application.max_body_size;
        router = router
            .layer(DefaultBodyLimit::max(max_body_size))
            .layer(RequestBodyLimitLayer::new(max_body_size))
            .layer(middleware::from_fn_with_state(
                ErrorPages {
                    debug: config.is_debug(),
                    templates,
                },
                error_page_middleware,
            ));

        if let Some(profiler) = &profiler {
            router = router
                .merge(create_profiler_router(profiler.clone()))
                .layer(middleware::from_fn_with_state(profiler.clone(), profiler_middleware));
        }

        tracing::debug!(
            routes = state.routes.entries().len(),
            entities = self.schemas.len(),
            profiler = profiler.is_some(),
            "应用已构建"
        );
        Ok(Application {
            state,
            router,
            schemas: self.schemas,
        })
    }
}

/// 允许的来源为空时不挂载；包含 `*` 时允许任意来源
fn cors_layer(config: &CorsConfig) -> anyhow::Result<Option<CorsLayer>> {
    if config.allowed_origins.is_empty() {
        return Ok(None);
    }
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);
    if config.allowed_origins.iter().any(|o| o == "*") {
        return Ok(Some(layer.allow_origin(Any)));
    }
    let origins = config
        .allowed_origins
        .iter()
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("CORS 来源无效: {}", o)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Some(layer.allow_origin(AllowOrigin::list(origins))))
}

/// 已构建的应用
pub struct Application {
    state: AppState,
    router: Router,
    schemas: Vec<TableSchema>,
}

impl Application {
    pub fn builder(config: Config) -> ApplicationBuilder {
        ApplicationBuilder {
            config,
            controllers: Vec::new(),
            schemas: Vec::new(),
            security: SecurityExtensions::default(),
            collectors: Vec::new(),
            database: None,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn schemas(&self) -> &[TableSchema] {
        &self.schemas
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// 监听配置中的地址
    pub async fn serve(self) -> anyhow::Result<()> {
        let host = self.state.config.application.host.clone();
        let port = self.state.config.application.port;
        self.serve_on(&host, port).await
    }

    pub async fn serve_on(self, host: &str, port: u16) -> anyhow::Result<()> {
        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("监听 {} 失败", addr))?;

        self.state.security.spawn_cleanup();
        tracing::info!("服务已启动: http://{}", addr);
        if self.state.profiler.is_some() {
            tracing::info!("Profiler: http://{}/_profiler", addr);
        }

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务运行失败")?;
        tracing::info!("服务已停止");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("监听 Ctrl-C 失败: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("收到停止信号，正在关闭");
}

#[cfg(test)]
mod tests {
    use axum::{
        Json,
        body::Body,
        extract::{Path, State},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::orm::{Column, ColumnType, SqlValue};
    use crate::profiler::middleware::DEBUG_TOKEN_HEADER;

    #[derive(Debug, Clone, Serialize)]
    struct Game {
        id: Option<i64>,
        title: String,
    }

    impl Entity for Game {
        fn table_name() -> &'static str {
            "game"
        }

        fn columns() -> Vec<Column> {
            vec![Column::new("title", ColumnType::Text)]
        }

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = Some(id);
        }

        fn to_values(&self) -> Vec<(&'static str, SqlValue)> {
            vec![("title", SqlValue::Text(self.title.clone()))]
        }

        fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get("id")?,
                title: row.get("title")?,
            })
        }
    }

    struct GameController;

    async fn index(State(state): State<AppState>) -> Result<Json<Vec<Game>>, FrameworkError> {
        Ok(Json(state.repository::<Game>().find_all()?))
    }

    async fn show(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Html<String>, FrameworkError> {
        let game = state.repository::<Game>().find_or_fail(id)?;
        let link = state.url_for("game_show", &[("id", &id.to_string())])?;
        state.render("game.html", serde_json::json!({ "game": game, "link": link }))
    }

    impl Controller for GameController {
        fn routes(&self, routes: &mut Routes<AppState>) {
            routes
                .get("/games", "game_index", index)
                .get("/games/{id}", "game_show", show);
        }
    }

    fn application(dir: &std::path::Path) -> Application {
        std::fs::create_dir_all(dir.join("templates")).unwrap();
        std::fs::create_dir_all(dir.join("public")).unwrap();
        std::fs::write(
            dir.join("templates/game.html"),
            "<html><body><h1>{{ game.title }}</h1><a href=\"{{ link }}\">self</a></body></html>",
        )
        .unwrap();
        std::fs::write(dir.join("public/app.css"), "body{}").unwrap();

        let mut config = Config::from_yaml_str("application:\n  env: dev\n").unwrap();
        config.application.template_dir = dir.join("templates");
        config.application.static_dir = dir.join("public");

        let db = Database::open_in_memory().unwrap();
        let app = Application::builder(config)
            .controller(GameController)
            .entity::<Game>()
            .database(db)
            .build()
            .unwrap();
        let em = &app.state().db;
        em.create_schema(app.schemas()).unwrap();
        em.repository::<Game>()
            .persist(&mut Game {
                id: None,
                title: "Fox <Quest>".into(),
            })
            .unwrap();
        app
    }

    #[tokio::test]
    async fn test_controller_routes_and_templates() {
        let dir = tempfile::tempdir().unwrap();
        let app = application(dir.path());

        let response = app
            .router()
            .oneshot(Request::get("/games").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let games: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(games[0]["title"], "Fox <Quest>");

        let response = app
            .router()
            .oneshot(Request::get("/games/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(DEBUG_TOKEN_HEADER));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("<h1>Fox &lt;Quest&gt;</h1>"));
        assert!(html.contains("href=\"/games/1\""));
        assert!(html.contains("/_profiler/"));
    }

    #[tokio::test]
    async fn test_not_found_and_static_files() {
        let dir = tempfile::tempdir().unwrap();
        let app = application(dir.path());

        let response = app
            .router()
            .oneshot(
                Request::get("/nowhere")
                    .header("accept", "application/json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .router()
            .oneshot(
                Request::get("/games/99")
                    .header("accept", "application/json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "not_found");

        let response = app
            .router()
            .oneshot(Request::get("/static/app.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_profile_recorded_with_queries() {
        let dir = tempfile::tempdir().unwrap();
        let app = application(dir.path());

        let response = app
            .router()
            .oneshot(Request::get("/games").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let token = response.headers()[DEBUG_TOKEN_HEADER].to_str().unwrap().to_string();

        let response = app
            .router()
            .oneshot(
                Request::get(format!("/_profiler/{}/database", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let panel: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(panel["count"], 1);

        let response = app
            .router()
            .oneshot(Request::get("/_profiler/ffffffffffff/request").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_build_refuses_default_secret_in_prod() {
        let config = Config::from_yaml_str("application:\n  env: prod\n").unwrap();
        let err = Application::builder(config)
            .database(Database::open_in_memory().unwrap())
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("secret_key"));
    }

    #[test]
    fn test_cors_layer_config() {
        assert!(cors_layer(&CorsConfig::default()).unwrap().is_none());
        assert!(
            cors_layer(&CorsConfig {
                allowed_origins: vec!["*".into()]
            })
            .unwrap()
            .is_some()
        );
        assert!(
            cors_layer(&CorsConfig {
                allowed_origins: vec!["bad\norigin".into()]
            })
            .is_err()
        );
    }
}
