use std::path::Path;

use anyhow::{bail, Context};
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

pub mod attention;
pub mod config;
pub mod ffn;
pub mod frozen;
pub mod lora;
pub mod norm;
pub mod positional_encoding;

pub use attention::CausalSelfAttention;
pub use config::PolicyConfig;
pub use ffn::SwiGLU;
pub use frozen::{FrozenEmbedding, FrozenLinear};
pub use lora::{AdapterBank, AdapterState, LoraLinear};
pub use norm::RMSNorm;
pub use positional_encoding::RoPE;

/// Transformer 块: 注意力 + SwiGLU, 前置 RMSNorm, 残差连接
#[derive(Module, Debug)]
pub struct TransformerBlock<B: Backend> {
    pub attention: CausalSelfAttention<B>,
    pub ffn: SwiGLU<B>,
    pub attn_norm: RMSNorm<B>,
    pub ffn_norm: RMSNorm<B>,
}

impl<B: Backend> TransformerBlock<B> {
    pub fn new(config: &PolicyConfig, device: &B::Device) -> Self {
        Self {
            attention: CausalSelfAttention::new(
                config.hidden_dim,
                config.num_heads,
                config.lora_rank,
                config.lora_alpha,
                device,
            ),
            ffn: SwiGLU::new(config.hidden_dim, config.mlp_dim, device),
            attn_norm: RMSNorm::new(config.hidden_dim, 1e-5, device),
            ffn_norm: RMSNorm::new(config.hidden_dim, 1e-5, device),
        }
    }

    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        rope: &RoPE<B>,
        pad_mask: Option<Tensor<B, 2, burn::tensor::Bool>>,
    ) -> Tensor<B, 3> {
        let h = x.clone()
            + self
                .attention
                .forward(self.attn_norm.forward(x), rope, pad_mask);
        h.clone() + self.ffn.forward(self.ffn_norm.forward(h))
    }
}

/// Policy 模型。
///
/// 基座 (embedding / k·o 投影 / FFN / 归一化 / 输出头) 全部是常量张量,
/// 唯一的可训练参数是每个 block 里 q/v 投影上的 LoRA A/B。
/// 因此 `GradientsParams::from_grads` 收集到的梯度天然只覆盖适配器。
#[derive(Module, Debug)]
pub struct PolicyModel<B: Backend> {
    pub embedding: FrozenEmbedding<B>,
    pub blocks: Vec<TransformerBlock<B>>,
    pub norm: RMSNorm<B>,
    pub output: FrozenLinear<B>,
    pub rope: RoPE<B>,
    pub pad_id: u32,
    pub max_seq_len: usize,
}

impl<B: Backend> PolicyModel<B> {
    pub fn new(config: &PolicyConfig, pad_id: u32, device: &B::Device) -> Self {
        let embedding = FrozenEmbedding::new(config.vocab_size, config.hidden_dim, device);
        let mut blocks = Vec::with_capacity(config.num_layers);
        for _ in 0..config.num_layers {
            blocks.push(TransformerBlock::new(config, device));
        }
        let norm = RMSNorm::new(config.hidden_dim, 1e-5, device);
        let output = FrozenLinear::new(config.hidden_dim, config.vocab_size, device);
        let rope = RoPE::new(config.head_dim(), config.max_seq_len, 10000.0, device);

        Self {
            embedding,
            blocks,
            norm,
            output,
            rope,
            pad_id,
            max_seq_len: config.max_seq_len,
        }
    }

    /// 前向传播。
    ///
    /// - `tokens`: [batch_size, seq_len]
    /// - `mask`: 可选 attention mask (1 真实 / 0 填充); 缺省时按 pad_id 推导
    ///
    /// 返回 logits [batch_size, seq_len, vocab_size]
    pub fn forward(&self, tokens: Tensor<B, 2, Int>, mask: Option<Tensor<B, 2, Int>>) -> Tensor<B, 3> {
        let padding_mask = match mask {
            Some(mask) => mask.equal_elem(0),
            None => tokens.clone().equal_elem(self.pad_id as i32),
        };

        let mut h = self.embedding.forward(tokens);
        for block in &self.blocks {
            h = block.forward(h, &self.rope, Some(padding_mask.clone()));
        }
        h = self.norm.forward(h);
        self.output.forward(h)
    }

    /// 带形状契约的前向: tokens 与 mask 的形状必须一致, 否则立即报错,
    /// 绝不静默截断或广播。
    pub fn try_forward(
        &self,
        tokens: Tensor<B, 2, Int>,
        mask: Tensor<B, 2, Int>,
    ) -> anyhow::Result<Tensor<B, 3>> {
        if tokens.dims() != mask.dims() {
            bail!(
                "tokens 与 attention mask 形状不一致: {:?} vs {:?}",
                tokens.dims(),
                mask.dims()
            );
        }
        Ok(self.forward(tokens, Some(mask)))
    }

    /// 导出全部 LoRA 适配器为 host 侧快照 (每 block 先 q 后 v)
    pub fn adapter_state(&self) -> AdapterState {
        let mut layers = Vec::with_capacity(self.blocks.len() * 2);
        for block in &self.blocks {
            layers.push(block.attention.w_q.export());
            layers.push(block.attention.w_v.export());
        }
        AdapterState { layers }
    }

    /// 用快照覆盖全部 LoRA 适配器, 基座保持不动
    pub fn load_adapter(mut self, state: &AdapterState, device: &B::Device) -> anyhow::Result<Self> {
        if state.num_layers() != self.blocks.len() * 2 {
            bail!(
                "适配器层数不匹配: 期望 {}, 实际 {}",
                self.blocks.len() * 2,
                state.num_layers()
            );
        }
        self.blocks = self
            .blocks
            .into_iter()
            .zip(state.layers.chunks(2))
            .map(|(mut block, pair)| {
                block.attention.w_q = block.attention.w_q.import(&pair[0], device);
                block.attention.w_v = block.attention.w_v.import(&pair[1], device);
                block
            })
            .collect();
        Ok(self)
    }

    fn adapter_bank(&self) -> AdapterBank<B> {
        let mut layers = Vec::with_capacity(self.blocks.len() * 2);
        for block in &self.blocks {
            layers.push(block.attention.w_q.clone());
            layers.push(block.attention.w_v.clone());
        }
        AdapterBank::new(layers)
    }

    /// 把适配器权重存入 `dir/adapter.bin` (只存 LoRA A/B)
    pub fn save_adapter<P: AsRef<Path>>(&self, dir: P) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir.as_ref())
            .with_context(|| format!("无法创建输出目录 {:?}", dir.as_ref()))?;
        let recorder = BinFileRecorder::<FullPrecisionSettings>::default();
        self.adapter_bank()
            .save_file(dir.as_ref().join("adapter"), &recorder)
            .map_err(anyhow::Error::msg)?;
        Ok(())
    }

    /// 从 `dir/adapter.bin` 读回适配器权重
    pub fn load_adapter_file<P: AsRef<Path>>(
        self,
        dir: P,
        device: &B::Device,
    ) -> anyhow::Result<Self> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::default();
        let bank = self
            .adapter_bank()
            .load_file(dir.as_ref().join("adapter"), &recorder, device)
            .map_err(anyhow::Error::msg)?;
        self.load_adapter(&bank.export(), device)
    }
}
