// ==========================================
// 商品目录导入引擎 - 命令行入口
// ==========================================
// 用法:
//   catalog-import create <job.json>
//   catalog-import run <job_id> [max_batches]
//   catalog-import status <job_id>
//   catalog-import restart <job_id>
//   catalog-import catalog <source-file> <csv|xml> [container]
//   catalog-import purge-trash
//
// 数据库路径: CATALOG_IMPORT_DB_PATH 或用户数据目录
// 说明: 命令行不注册 AI 提供方,AI 字段按回退规则取解析值
// ==========================================

use anyhow::{bail, Context};
use catalog_import_engine::api::{CreateJobRequest, ImportJobApi};
use catalog_import_engine::db::get_default_db_path;
use catalog_import_engine::domain::{SourceDescriptor, SourceFormat};
use catalog_import_engine::engine::{AiProviderRegistry, Budget};
use catalog_import_engine::logging;
use serde::Serialize;

const USAGE: &str = "用法: catalog-import <create|run|status|restart|catalog|purge-trash> [参数]";

/// 默认每个路径保留的样本值数
const CATALOG_SAMPLE_LIMIT: usize = 5;

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_format(value: &str) -> anyhow::Result<SourceFormat> {
    match value.to_ascii_lowercase().as_str() {
        "csv" => Ok(SourceFormat::Csv),
        "xml" => Ok(SourceFormat::Xml),
        other => bail!("不支持的源格式: {}", other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let command = args.next().context(USAGE)?;

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);
    let api = ImportJobApi::open(&db_path, AiProviderRegistry::new())?;

    match command.as_str() {
        "create" => {
            let path = args.next().context("缺少参数: <job.json>")?;
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("无法读取任务文件: {}", path))?;
            let request: CreateJobRequest =
                serde_json::from_str(&text).with_context(|| format!("任务文件格式错误: {}", path))?;
            let job = api.create_job(request)?;
            print_json(&catalog_import_engine::JobStatusView::from(&job))?;
        }
        "run" => {
            let job_id = args.next().context("缺少参数: <job_id>")?;
            let budget = match args.next() {
                Some(n) => Budget::batches(
                    n.parse::<usize>()
                        .with_context(|| format!("max_batches 不是有效数字: {}", n))?,
                ),
                None => Budget::unlimited(),
            };
            let outcome = api.run_job(&job_id, budget).await?;
            print_json(&outcome)?;
        }
        "status" => {
            let job_id = args.next().context("缺少参数: <job_id>")?;
            print_json(&api.job_status(&job_id)?)?;
        }
        "restart" => {
            let job_id = args.next().context("缺少参数: <job_id>")?;
            print_json(&api.restart_job(&job_id)?)?;
        }
        "catalog" => {
            let file_path = args.next().context("缺少参数: <source-file>")?;
            let format = parse_format(&args.next().context("缺少参数: <csv|xml>")?)?;
            let source = SourceDescriptor {
                file_path,
                format,
                container: args.next(),
                delimiter: None,
            };
            print_json(&api.structure_catalog(&source, CATALOG_SAMPLE_LIMIT)?)?;
        }
        "purge-trash" => {
            let purged = api.purge_trash()?;
            print_json(&serde_json::json!({ "purged": purged }))?;
        }
        other => bail!("未知命令: {}\n{}", other, USAGE),
    }

    Ok(())
}
