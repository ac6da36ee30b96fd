use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Int, Tensor};

/// 无偏置的冻结线性层。
///
/// 权重是普通张量而非 `Param`, 因此既不产生梯度也不被优化器更新。
/// 可训练面被严格限制在 LoRA 适配器上, 靠的就是这一点:
/// 不是运行时开关, 而是结构上根本没有参数。
#[derive(Module, Debug)]
pub struct FrozenLinear<B: Backend> {
    pub weight: Tensor<B, 2>, // [d_in, d_out]
}

impl<B: Backend> FrozenLinear<B> {
    pub fn new(d_in: usize, d_out: usize, device: &B::Device) -> Self {
        Self {
            weight: Tensor::random([d_in, d_out], Distribution::Normal(0.0, 0.02), device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch_size, seq_len, d_in] = x.dims();
        let [_, d_out] = self.weight.dims();
        x.reshape([batch_size * seq_len, d_in])
            .matmul(self.weight.clone())
            .reshape([batch_size, seq_len, d_out])
    }
}

/// 冻结的 token 嵌入表
#[derive(Module, Debug)]
pub struct FrozenEmbedding<B: Backend> {
    pub weight: Tensor<B, 2>, // [vocab_size, hidden_dim]
}

impl<B: Backend> FrozenEmbedding<B> {
    pub fn new(vocab_size: usize, hidden_dim: usize, device: &B::Device) -> Self {
        Self {
            weight: Tensor::random(
                [vocab_size, hidden_dim],
                Distribution::Normal(0.0, 0.02),
                device,
            ),
        }
    }

    pub fn forward(&self, tokens: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch_size, seq_len] = tokens.dims();
        let [_, hidden_dim] = self.weight.dims();
        let flat = tokens.reshape([batch_size * seq_len]);
        self.weight
            .clone()
            .select(0, flat)
            .reshape([batch_size, seq_len, hidden_dim])
    }
}
