use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context};
use burn::data::dataset::Dataset;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::data::RlTokenizer;

/// JSONL 数据集中的一条问题记录
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PromptRecord {
    pub question: String,
}

/// 定长编码后的 prompt。`input_ids` 与 `attention_mask` 等长,
/// mask 为 0 的位置是 EOS 填充。
#[derive(Clone, Debug)]
pub struct EncodedPrompt {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

impl EncodedPrompt {
    /// 真实 (非填充) token 数
    pub fn real_len(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }
}

#[derive(Clone, Debug)]
pub struct PromptDataset {
    items: Vec<EncodedPrompt>,
}

impl PromptDataset {
    /// 从 JSONL 文件加载并定长编码, 空行跳过
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        tokenizer: &RlTokenizer,
        max_length: usize,
    ) -> anyhow::Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("无法打开数据集文件 {:?}", path.as_ref()))?;
        let reader = BufReader::new(file);

        let mut items = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: PromptRecord = serde_json::from_str(&line)?;
            items.push(tokenizer.encode_padded(&record.question, max_length)?);
        }

        Ok(Self { items })
    }

    pub fn from_encoded(items: Vec<EncodedPrompt>) -> Self {
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 嵌套二分切分: 先按 `test_size` 切出测试集,
    /// 再从剩余部分按 `val_size` 切出验证集, 其余作为训练集。
    /// 返回 (train, val, test)。
    pub fn split(mut self, test_size: f64, val_size: f64, seed: u64) -> (Self, Self, Self) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.items.shuffle(&mut rng);

        let n = self.items.len();
        let n_test = ((n as f64) * test_size).round() as usize;
        let test: Vec<_> = self.items.split_off(n.saturating_sub(n_test));

        let m = self.items.len();
        let n_val = ((m as f64) * val_size).round() as usize;
        let val: Vec<_> = self.items.split_off(m.saturating_sub(n_val));

        (
            Self { items: self.items },
            Self { items: val },
            Self { items: test },
        )
    }
}

impl Dataset<EncodedPrompt> for PromptDataset {
    fn get(&self, index: usize) -> Option<EncodedPrompt> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// 循环数据加载器: 取到末尾后从头重来, 并记录重启次数。
/// 训练消耗的 batch 数可以大于数据集本身的大小。
pub struct CyclicLoader {
    dataset: PromptDataset,
    cursor: usize,
    restarts: usize,
}

impl CyclicLoader {
    pub fn new(dataset: PromptDataset) -> anyhow::Result<Self> {
        if dataset.is_empty() {
            bail!("数据集为空, 无法构造循环加载器");
        }
        Ok(Self {
            dataset,
            cursor: 0,
            restarts: 0,
        })
    }

    /// 取下一个 batch。跨越末尾时回绕, 因此返回的数量恒等于 `batch_size`。
    pub fn next_batch(&mut self, batch_size: usize) -> Vec<EncodedPrompt> {
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            if self.cursor >= self.dataset.len() {
                self.cursor = 0;
                self.restarts += 1;
            }
            if let Some(item) = self.dataset.get(self.cursor) {
                batch.push(item);
            }
            self.cursor += 1;
        }
        batch
    }

    pub fn restarts(&self) -> usize {
        self.restarts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(id: u32) -> EncodedPrompt {
        EncodedPrompt {
            input_ids: vec![id, id, 0, 0],
            attention_mask: vec![1, 1, 0, 0],
        }
    }

    #[test]
    fn test_real_len_counts_mask() {
        assert_eq!(prompt(3).real_len(), 2);
    }

    #[test]
    fn test_cyclic_loader_wraps_around() {
        let dataset = PromptDataset::from_encoded(vec![prompt(1), prompt(2)]);
        let mut loader = CyclicLoader::new(dataset).unwrap();

        // 4 个 batch, 每个 1 条, 数据集只有 2 条 -> 必然回绕
        for _ in 0..4 {
            let batch = loader.next_batch(1);
            assert_eq!(batch.len(), 1);
        }
        assert!(loader.restarts() >= 1);
    }

    #[test]
    fn test_cyclic_loader_rejects_empty() {
        assert!(CyclicLoader::new(PromptDataset::from_encoded(vec![])).is_err());
    }

    #[test]
    fn test_split_proportions() {
        let items: Vec<_> = (0..40).map(prompt).collect();
        let dataset = PromptDataset::from_encoded(items);
        let (train, val, test) = dataset.split(0.2, 0.125, 42);

        assert_eq!(test.len(), 8);
        assert_eq!(val.len(), 4);
        assert_eq!(train.len(), 28);
    }
}
