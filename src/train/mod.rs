use burn::optim::AdamWConfig;

use crate::model::PolicyConfig;

pub mod buffer;
pub mod grpo;
pub mod reward;
pub mod rollout;
pub mod trainer;

/// GRPO 训练配置。默认值即推荐起点:
/// 小 batch、低学习率、短 group, 配合 clip 0.2 / KL 0.02。
#[derive(Clone, Debug)]
pub struct GrpoTrainingConfig {
    pub model: PolicyConfig,
    pub optimizer: AdamWConfig,
    pub epochs: usize,
    /// 每个 epoch 采集的 rollout 数, 也是优势估计的组大小
    pub steps_per_group: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// PPO 裁剪半径 epsilon
    pub clip_epsilon: f64,
    /// KL 惩罚系数 beta
    pub kl_beta: f64,
    /// 快照缓冲区容量上限
    pub buffer_size: usize,
    /// 奖励评估时的生成预算 (无其他停止条件)
    pub max_new_tokens: usize,
    /// prompt 的定长编码长度
    pub max_seq_len: usize,
    pub seed: u64,
    pub output_dir: String,
}

impl GrpoTrainingConfig {
    pub fn new(model: PolicyConfig) -> Self {
        Self {
            model,
            optimizer: AdamWConfig::new(),
            epochs: 3,
            steps_per_group: 4,
            batch_size: 1,
            learning_rate: 1e-5,
            clip_epsilon: 0.2,
            kl_beta: 0.02,
            buffer_size: 5,
            max_new_tokens: 50,
            max_seq_len: 128,
            seed: 42,
            output_dir: "grpo_final".to_string(),
        }
    }
}

/// 单个 epoch 的计数与指标
#[derive(Clone, Debug, Default)]
pub struct EpochStats {
    pub rollouts: usize,
    pub advantage_calls: usize,
    pub optimizer_steps: usize,
    pub buffer_adds: usize,
    pub mean_return: f64,
    pub mean_loss: f64,
    /// 本 epoch 是否推进了参考策略
    pub synced_reference: bool,
}

/// 整次训练的逐 epoch 记录
#[derive(Clone, Debug, Default)]
pub struct TrainReport {
    pub epochs: Vec<EpochStats>,
}
