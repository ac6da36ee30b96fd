//! RLTune: 对因果语言模型做 GRPO (Group Relative Policy Optimization) 强化学习微调。
//!
//! 训练目标只作用在 LoRA 适配器上, 基座权重全程冻结。每个 epoch 按
//! COLLECT -> ADVANTAGE -> UPDATE -> SYNC 四个阶段推进:
//! 采集一组 rollout, 用组内相对优势替代 critic, 做 PPO 裁剪 + KL 惩罚更新,
//! 最后在组平均回报为正时保守地推进参考策略。

pub mod backend;
pub mod data;
pub mod model;
pub mod train;

pub use data::{PromptDataset, RlTokenizer, TokenDecoder};
pub use model::{PolicyConfig, PolicyModel};
pub use train::trainer::GrpoTrainer;
pub use train::{EpochStats, GrpoTrainingConfig, TrainReport};
