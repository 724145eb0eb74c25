// splits.rs
// 划分文件生成器：扫描 Train/Val/Test 图像目录，按比例随机划分有标注和无标注样本，写出训练框架使用的ID列表。
use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// 每个划分的样本数统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct SplitSummary {
    pub train: usize,
    pub val: usize,
    pub test: usize,
    /// (划分名, 有标注数, 无标注数)
    pub splits: Vec<(String, usize, usize)>,
}

/// 划分文件生成器
#[derive(Debug, Clone)]
pub struct SplitGenerator {
    /// 数据集目录，包含 Train/Val/Test/image
    pub dataset_dir: PathBuf,
    /// 输出目录，如 splits/gf7-building
    pub output_dir: PathBuf,
    /// 有标注比例的分母，32 表示 1/32 的样本有标注
    pub ratios: Vec<usize>,
    /// 需要额外生成小规模测试划分的比例
    pub small_ratios: Vec<usize>,
    /// 小规模划分取原划分的 1/small_divisor
    pub small_divisor: usize,
    pub seed: u64,
    /// 图像文件扩展名
    pub extension: String,
}

impl SplitGenerator {
    pub fn new(dataset_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
            output_dir: output_dir.into(),
            ratios: vec![4, 8, 16, 32, 64],
            small_ratios: vec![32, 64],
            small_divisor: 100,
            seed: 42,
            extension: "tif".to_string(),
        }
    }

    /// 生成全部划分文件
    pub fn generate(&self) -> Result<SplitSummary> {
        if self.ratios.contains(&0) || self.small_divisor == 0 {
            return Err(Error::ConfigError(format!(
                "划分比例和小规模分母必须为正整数: ratios={:?}, small_divisor={}",
                self.ratios, self.small_divisor
            )));
        }
        fs::create_dir_all(&self.output_dir)?;

        let train = self.image_files("Train")?;
        let val = self.image_files("Val")?;
        let test = self.image_files("Test")?;
        tracing::info!(
            "训练集 {} 张，验证集 {} 张，测试集 {} 张",
            train.len(),
            val.len(),
            test.len()
        );

        write_list(&self.output_dir.join("val.txt"), &val, "Val")?;
        write_list(&self.output_dir.join("test.txt"), &test, "Test")?;
        write_list(&self.output_dir.join("all").join("labeled.txt"), &train, "Train")?;

        let mut summary = SplitSummary {
            train: train.len(),
            val: val.len(),
            test: test.len(),
            splits: vec![("all".to_string(), train.len(), 0)],
        };

        for &ratio in &self.ratios {
            let (labeled, unlabeled) = self.partition(&train, ratio);
            let name = format!("1_{}", ratio);
            self.write_split(&name, &labeled, &unlabeled)?;
            summary.splits.push((name, labeled.len(), unlabeled.len()));

            if self.small_ratios.contains(&ratio) {
                let small_labeled = truncate(&labeled, self.small_divisor);
                let small_unlabeled = truncate(&unlabeled, self.small_divisor);
                let name = format!("small_1_{}", ratio);
                self.write_split(&name, small_labeled, small_unlabeled)?;
                summary
                    .splits
                    .push((name, small_labeled.len(), small_unlabeled.len()));
            }
        }

        tracing::info!("划分文件已写入: {}", self.output_dir.display());
        Ok(summary)
    }

    /// 排序后的图像文件名；目录不存在时返回空列表
    fn image_files(&self, split: &str) -> Result<Vec<String>> {
        let image_dir = self.dataset_dir.join(split).join("image");
        if !image_dir.exists() {
            tracing::warn!("{} 不存在", image_dir.display());
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&image_dir)? {
            let path = entry?.path();
            let matches = path
                .extension()
                .is_some_and(|ext| ext == self.extension.as_str());
            if matches && path.is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// 用固定种子打乱后，前 len/ratio 个为有标注样本
    fn partition(&self, images: &[String], ratio: usize) -> (Vec<String>, Vec<String>) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut shuffled = images.to_vec();
        shuffled.shuffle(&mut rng);

        let num_labeled = shuffled.len() / ratio;
        let unlabeled = shuffled.split_off(num_labeled);
        (shuffled, unlabeled)
    }

    fn write_split(&self, name: &str, labeled: &[String], unlabeled: &[String]) -> Result<()> {
        let dir = self.output_dir.join(name);
        write_list(&dir.join("labeled.txt"), labeled, "Train")?;
        write_list(&dir.join("unlabeled.txt"), unlabeled, "Train")?;
        Ok(())
    }
}

/// 取前 max(1, len/divisor) 个
fn truncate(items: &[String], divisor: usize) -> &[String] {
    let n = (items.len() / divisor.max(1)).max(1).min(items.len());
    &items[..n]
}

/// 每行格式：`<Split>/image/<name> <Split>/label/<name>`
pub fn split_line(name: &str, split: &str) -> String {
    format!("{split}/image/{name} {split}/label/{name}")
}

fn write_list(path: &Path, names: &[String], split: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(fs::File::create(path)?);
    for name in names {
        writeln!(writer, "{}", split_line(name, split))?;
    }
    writer.flush()?;
    Ok(())
}
