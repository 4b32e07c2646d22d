#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 需要在读取配置之前加载（配置中的 ${VAR} 从环境变量替换）
    dotenvy::dotenv().ok();
    framefox::cli::run(|builder| builder).await
}
