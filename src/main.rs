// main.rs
// 命令行入口：提交调度器作业、准备环境、启动分布式训练、生成划分文件。
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use launcher::config::MountPoint;
use launcher::job::JobSubmitter;
use launcher::pipeline::Pipeline;
use launcher::splits::SplitGenerator;
use launcher::step::{Step, StepReport};
use launcher::{LaunchConfig, SystemRunner};
use prettytable::{row, Table};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "unimatch-launch", about = "UniMatch-V2 半监督分割训练启动器")]
struct Cli {
    /// launch.toml 配置文件路径，缺省时使用内置默认值
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 覆盖配置中的工作目录
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// 位置参数：进程数（GPU数）和主节点端口
#[derive(Args, Debug, Clone, Copy)]
struct LaunchArgs {
    /// 进程数，缺省为配置值（默认1）
    nproc: Option<usize>,
    /// 主节点端口，缺省为配置值（默认29500）
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 克隆仓库、下载权重并建立符号链接
    Bootstrap,

    /// 启动分布式训练（不执行环境准备）
    Train {
        #[command(flatten)]
        launch: LaunchArgs,
    },

    /// 环境准备后启动训练
    Run {
        #[command(flatten)]
        launch: LaunchArgs,
    },

    /// 打印将要执行的步骤，不执行
    Plan {
        #[command(flatten)]
        launch: LaunchArgs,

        /// 以JSON格式输出
        #[arg(long)]
        json: bool,
    },

    /// 生成并提交调度器作业
    Submit {
        #[command(flatten)]
        launch: LaunchArgs,

        /// 只打印作业脚本，不提交
        #[arg(long)]
        dry_run: bool,

        /// 容器镜像
        #[arg(long)]
        image: Option<String>,

        /// host:container 挂载，可重复
        #[arg(long = "mount")]
        mounts: Vec<String>,
    },

    /// 生成有标注/无标注划分文件
    Splits {
        /// 包含 Train/Val/Test 的数据集目录
        #[arg(long)]
        dataset_dir: PathBuf,

        /// 输出目录，如 UniMatch-V2/splits/gf7-building
        #[arg(long)]
        output_dir: PathBuf,

        /// 有标注比例分母，可重复
        #[arg(long = "ratio", value_parser = parse_ratio)]
        ratios: Vec<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// 以JSON格式输出统计
        #[arg(long)]
        json: bool,
    },
}

/// 比例分母必须为正整数
fn parse_ratio(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("比例分母不能为0".to_string()),
        Ok(ratio) => Ok(ratio),
        Err(e) => Err(e.to_string()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("错误: {:#}", e);
            // 训练进程的退出码原样返回
            let code = e
                .downcast_ref::<launcher::Error>()
                .and_then(launcher::Error::exit_code)
                .and_then(|code| u8::try_from(code).ok())
                .filter(|&code| code != 0)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<LaunchConfig> {
    let mut config = match cli.config {
        Some(ref path) => LaunchConfig::load(path)
            .with_context(|| format!("加载配置 {} 失败", path.display()))?,
        None => LaunchConfig::default(),
    };
    if let Some(ref work_dir) = cli.work_dir {
        config.work_dir = work_dir.clone();
    }
    if config.work_dir.is_relative() {
        config.work_dir = std::path::absolute(&config.work_dir)?;
    }
    Ok(config)
}

fn apply_launch_args(config: &mut LaunchConfig, args: LaunchArgs) {
    config.launch = config.launch.clone().with_overrides(args.nproc, args.port);
}

fn execute(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Bootstrap => {
            let mut pipeline = Pipeline::new(config, SystemRunner);
            let result = pipeline.bootstrap();
            print_reports(&pipeline.reports()[..Step::BOOTSTRAP.len()]);
            result?;
        }
        Commands::Train { launch } => {
            apply_launch_args(&mut config, launch);
            let mut pipeline = Pipeline::new(config, SystemRunner);
            pipeline.train()?;
        }
        Commands::Run { launch } => {
            apply_launch_args(&mut config, launch);
            let mut pipeline = Pipeline::new(config, SystemRunner);
            let result = pipeline.run();
            print_reports(pipeline.reports());
            result?;
        }
        Commands::Plan { launch, json } => {
            apply_launch_args(&mut config, launch);
            let pipeline = Pipeline::new(config, SystemRunner);
            let plan = pipeline.plan();
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                let mut table = Table::new();
                table.add_row(row!["序号", "步骤", "命令"]);
                for (i, planned) in plan.iter().enumerate() {
                    table.add_row(row![i + 1, planned.step, &planned.command]);
                }
                table.printstd();
            }
        }
        Commands::Submit {
            launch,
            dry_run,
            image,
            mounts,
        } => {
            apply_launch_args(&mut config, launch);
            if image.is_some() {
                config.job.image = image;
            }
            for mount in &mounts {
                let mount: MountPoint = mount.parse()?;
                config.job.mounts.push(mount);
            }

            let submitter = JobSubmitter::new(&config, &SystemRunner);
            if dry_run {
                print!("{}", submitter.render()?);
            } else {
                let job_id = submitter.submit()?;
                println!("已提交作业 {}", job_id);
            }
        }
        Commands::Splits {
            dataset_dir,
            output_dir,
            ratios,
            seed,
            json,
        } => {
            let mut generator =
                SplitGenerator::new(config.work_dir.join(dataset_dir), config.work_dir.join(output_dir));
            if !ratios.is_empty() {
                generator.ratios = ratios;
            }
            if let Some(seed) = seed {
                generator.seed = seed;
            }
            let summary = generator.generate()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            let mut table = Table::new();
            table.add_row(row!["划分", "有标注", "无标注"]);
            table.add_row(row!["val", summary.val, "-"]);
            table.add_row(row!["test", summary.test, "-"]);
            for (name, labeled, unlabeled) in &summary.splits {
                table.add_row(row![name, labeled, unlabeled]);
            }
            table.printstd();
        }
    }
    Ok(())
}

/// 表格化打印步骤状态
fn print_reports(reports: &[StepReport]) {
    let mut table = Table::new();
    table.add_row(row!["步骤", "状态"]);
    for report in reports {
        table.add_row(row![report.step, report.status]);
    }
    table.printstd();
}
