/// Policy 模型结构配置。
///
/// 这里的 transformer 是训练回路的替身基座; 真实权重的加载/对齐
/// 属于外部加载器的职责, 不在本 crate 内。
#[derive(Clone, Debug)]
pub struct PolicyConfig {
    pub vocab_size: usize,
    pub hidden_dim: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub mlp_dim: usize,
    /// RoPE 表长度, 必须覆盖 "prompt 长度 + 生成预算"
    pub max_seq_len: usize,
    pub lora_rank: usize,
    pub lora_alpha: f64,
}

impl PolicyConfig {
    pub fn small() -> Self {
        Self {
            vocab_size: 32000,
            hidden_dim: 512,
            num_heads: 8,
            num_layers: 6,
            mlp_dim: 1408,
            max_seq_len: 256,
            lora_rank: 8,
            lora_alpha: 16.0,
        }
    }

    /// CPU 上秒级跑完的配置, 测试专用
    pub fn tiny() -> Self {
        Self {
            vocab_size: 64,
            hidden_dim: 32,
            num_heads: 4,
            num_layers: 2,
            mlp_dim: 96,
            max_seq_len: 32,
            lora_rank: 4,
            lora_alpha: 8.0,
        }
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_dim / self.num_heads
    }
}
