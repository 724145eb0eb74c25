use launcher::job::JobScript;
use launcher::paths::RunPaths;
use launcher::{LaunchConfig, Pipeline, SystemRunner};
use prettytable::{row, Table};

/// 打印默认配置下的派生路径、执行计划和作业脚本，不执行任何命令
fn main() -> launcher::Result<()> {
    println!("=== UniMatch-V2 启动计划示例 ===");

    let mut config = LaunchConfig::default();
    config.launch = config.launch.with_overrides(Some(4), Some(30000));
    config.job.gpus = 4;

    let paths = RunPaths::derive(&config.run, &config.launch);
    println!("配置文件:   {}", paths.config.display());
    println!("有标注列表: {}", paths.labeled_id_path.display());
    println!("无标注列表: {}", paths.unlabeled_id_path.display());
    println!("保存目录:   {}", paths.save_path.display());

    let pipeline = Pipeline::new(config.clone(), SystemRunner);
    let mut table = Table::new();
    table.add_row(row!["序号", "步骤", "命令"]);
    for (i, planned) in pipeline.plan().iter().enumerate() {
        table.add_row(row![i + 1, planned.step, &planned.command]);
    }
    table.printstd();

    println!("\n--- 作业脚本 ---");
    print!("{}", JobScript::render(&config.job, &config.launch));
    Ok(())
}
