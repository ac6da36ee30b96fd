use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor};

use crate::model::frozen::FrozenLinear;
use crate::model::lora::LoraLinear;
use crate::model::positional_encoding::RoPE;

/// 因果多头自注意力。
///
/// q/v 投影挂 LoRA 适配器, k/o 纯冻结 —— 与常见的
/// `target_modules = [q_proj, v_proj]` 适配约定一致。
#[derive(Module, Debug)]
pub struct CausalSelfAttention<B: Backend> {
    pub w_q: LoraLinear<B>,
    pub w_k: FrozenLinear<B>,
    pub w_v: LoraLinear<B>,
    pub w_o: FrozenLinear<B>,
    pub n_heads: usize,
    pub head_dim: usize,
}

impl<B: Backend> CausalSelfAttention<B> {
    pub fn new(
        hidden_dim: usize,
        n_heads: usize,
        lora_rank: usize,
        lora_alpha: f64,
        device: &B::Device,
    ) -> Self {
        let head_dim = hidden_dim / n_heads;
        Self {
            w_q: LoraLinear::new(hidden_dim, hidden_dim, lora_rank, lora_alpha, device),
            w_k: FrozenLinear::new(hidden_dim, hidden_dim, device),
            w_v: LoraLinear::new(hidden_dim, hidden_dim, lora_rank, lora_alpha, device),
            w_o: FrozenLinear::new(hidden_dim, hidden_dim, device),
            n_heads,
            head_dim,
        }
    }

    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        rope: &RoPE<B>,
        pad_mask: Option<Tensor<B, 2, Bool>>,
    ) -> Tensor<B, 3> {
        let [batch_size, seq_len, _hidden_dim] = x.dims();

        let q = self.w_q.forward(x.clone());
        let k = self.w_k.forward(x.clone());
        let v = self.w_v.forward(x);

        // [Batch, Seq, Heads * Dim] -> [Batch, Heads, Seq, Dim]
        let q = q
            .reshape([batch_size, seq_len, self.n_heads, self.head_dim])
            .swap_dims(1, 2);
        let k = k
            .reshape([batch_size, seq_len, self.n_heads, self.head_dim])
            .swap_dims(1, 2);
        let v = v
            .reshape([batch_size, seq_len, self.n_heads, self.head_dim])
            .swap_dims(1, 2);

        let q = rope.forward(q);
        let k = rope.forward(k);

        let device = q.device();
        let scale = (self.head_dim as f32).sqrt().recip();
        let mut attn_scores = q.matmul(k.swap_dims(2, 3)) * scale;

        if seq_len > 1 {
            let causal_mask = Tensor::<B, 2>::ones([seq_len, seq_len], &device)
                .triu(1)
                .bool()
                .reshape([1, 1, seq_len, seq_len]);
            attn_scores = attn_scores.mask_fill(causal_mask, -f32::INFINITY);

            if let Some(pad_mask) = pad_mask {
                let pad_mask = pad_mask
                    .unsqueeze::<4>()
                    .reshape([batch_size, 1, 1, seq_len]);
                attn_scores = attn_scores.mask_fill(pad_mask, -f32::INFINITY);
            }
        }

        let attn = burn::tensor::activation::softmax(attn_scores, 3);
        let out = attn
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch_size, seq_len, self.n_heads * self.head_dim]);
        self.w_o.forward(out)
    }
}
