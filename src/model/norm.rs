use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// RMSNorm。gamma 属于基座, 保持为常量张量, 不参与训练。
#[derive(Module, Debug)]
pub struct RMSNorm<B: Backend> {
    pub gamma: Tensor<B, 1>,
    pub epsilon: f64,
}

impl<B: Backend> RMSNorm<B> {
    pub fn new(dim: usize, epsilon: f64, device: &B::Device) -> Self {
        Self {
            gamma: Tensor::ones([dim], device),
            epsilon,
        }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let dim = x.dims()[D - 1];

        // RMS 对最后一维
        let norm = (x.clone().powf_scalar(2.0).mean_dim(D - 1) + self.epsilon).sqrt();
        let x = x / norm;

        // 广播形状 [1, 1, ..., dim]
        let mut shape = [1; D];
        shape[D - 1] = dim;

        x * self.gamma.clone().reshape(shape)
    }
}
