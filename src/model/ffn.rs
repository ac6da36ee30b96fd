use burn::module::Module;
use burn::tensor::activation::silu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::model::frozen::FrozenLinear;

/// SwiGLU 前馈网络。三个投影都属于冻结基座。
#[derive(Module, Debug)]
pub struct SwiGLU<B: Backend> {
    pub w1: FrozenLinear<B>, // 门控投影
    pub w2: FrozenLinear<B>, // 输出投影
    pub w3: FrozenLinear<B>, // 数据投影
}

impl<B: Backend> SwiGLU<B> {
    pub fn new(hidden_dim: usize, mlp_dim: usize, device: &B::Device) -> Self {
        Self {
            w1: FrozenLinear::new(hidden_dim, mlp_dim, device),
            w2: FrozenLinear::new(mlp_dim, hidden_dim, device),
            w3: FrozenLinear::new(hidden_dim, mlp_dim, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let gate = silu(self.w1.forward(x.clone()));
        let data = self.w3.forward(x);
        self.w2.forward(gate * data)
    }
}
