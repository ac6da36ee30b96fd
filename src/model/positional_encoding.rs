use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// 旋转位置编码 (RoPE)。频率表在构造时一次算好, 作为常量张量存放。
#[derive(Module, Debug)]
pub struct RoPE<B: Backend> {
    pub freqs: Tensor<B, 4>, // [1, 1, max_seq_len, head_dim / 2]
}

impl<B: Backend> RoPE<B> {
    pub fn new(dim: usize, max_seq_len: usize, theta: f32, device: &B::Device) -> Self {
        // theta_i = theta ^ (-2i/d)
        let inv_freq: Vec<f32> = (0..dim)
            .step_by(2)
            .map(|i| 1.0 / theta.powf(i as f32 / dim as f32))
            .collect();
        let inv_freq = Tensor::<B, 1>::from_data(inv_freq.as_slice(), device).reshape([1, dim / 2]);

        let positions: Vec<f32> = (0..max_seq_len).map(|p| p as f32).collect();
        let positions =
            Tensor::<B, 1>::from_data(positions.as_slice(), device).reshape([max_seq_len, 1]);

        // 外积 -> [max_seq_len, dim / 2]
        let freqs = positions.matmul(inv_freq).reshape([1, 1, max_seq_len, dim / 2]);

        Self { freqs }
    }

    /// x: [Batch, NumHeads, SeqLen, HeadDim]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch_size, num_heads, seq_len, head_dim] = x.dims();
        let half = head_dim / 2;

        // 按 (实部, 虚部) 对重排
        let pairs = x.reshape([batch_size, num_heads, seq_len, half, 2]);
        let x0 = pairs
            .clone()
            .slice([0..batch_size, 0..num_heads, 0..seq_len, 0..half, 0..1])
            .squeeze_dim(4);
        let x1 = pairs
            .slice([0..batch_size, 0..num_heads, 0..seq_len, 0..half, 1..2])
            .squeeze_dim(4);

        let freqs = self.freqs.clone().slice([0..1, 0..1, 0..seq_len, 0..half]);
        let cos = freqs.clone().cos();
        let sin = freqs.sin();

        // [x0, x1] -> [x0*cos - x1*sin, x0*sin + x1*cos]
        let rx0: Tensor<B, 4> = x0.clone() * cos.clone() - x1.clone() * sin.clone();
        let rx1: Tensor<B, 4> = x0 * sin + x1 * cos;

        Tensor::<B, 5>::cat(vec![rx0.unsqueeze_dim(4), rx1.unsqueeze_dim(4)], 4)
            .reshape([batch_size, num_heads, seq_len, head_dim])
    }
}
