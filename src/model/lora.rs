use anyhow::bail;
use burn::module::{Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor, TensorData};

/// 带 LoRA 适配器的线性层。
///
/// 基座权重是普通张量 (常量), 不会出现在梯度里, 也不会被优化器触碰;
/// 只有低秩分解 A/B 是 `Param`。前向为:
///
///   y = x W + (x A) B * (alpha / r)
///
/// B 零初始化, 训练起点处适配器增量恒为 0, 行为与纯基座一致。
#[derive(Module, Debug)]
pub struct LoraLinear<B: Backend> {
    pub weight: Tensor<B, 2>, // [d_in, d_out] 冻结
    pub lora_a: Param<Tensor<B, 2>>, // [d_in, rank]
    pub lora_b: Param<Tensor<B, 2>>, // [rank, d_out]
    pub scale: f64,
}

impl<B: Backend> LoraLinear<B> {
    pub fn new(d_in: usize, d_out: usize, rank: usize, alpha: f64, device: &B::Device) -> Self {
        let weight = Tensor::random([d_in, d_out], Distribution::Normal(0.0, 0.02), device);
        let lora_a = Param::from_tensor(Tensor::random(
            [d_in, rank],
            Distribution::Normal(0.0, 0.02),
            device,
        ));
        let lora_b = Param::from_tensor(Tensor::zeros([rank, d_out], device));
        Self {
            weight,
            lora_a,
            lora_b,
            scale: alpha / rank as f64,
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch_size, seq_len, d_in] = x.dims();
        let [_, d_out] = self.weight.dims();

        let flat = x.reshape([batch_size * seq_len, d_in]);
        let base = flat.clone().matmul(self.weight.clone());
        let delta = flat.matmul(self.lora_a.val()).matmul(self.lora_b.val()) * self.scale;

        (base + delta).reshape([batch_size, seq_len, d_out])
    }

    /// 导出适配器权重为 host 侧快照
    pub fn export(&self) -> LoraTensors {
        LoraTensors {
            a: self.lora_a.val().into_data(),
            b: self.lora_b.val().into_data(),
        }
    }

    /// 用快照覆盖 A/B, 基座权重保持不动
    pub fn import(mut self, state: &LoraTensors, device: &B::Device) -> Self {
        self.lora_a = Param::from_tensor(Tensor::from_data(state.a.clone(), device));
        self.lora_b = Param::from_tensor(Tensor::from_data(state.b.clone(), device));
        self
    }
}

/// 单个 LoRA 层的 host 侧权重对
#[derive(Clone, Debug)]
pub struct LoraTensors {
    pub a: TensorData,
    pub b: TensorData,
}

/// 整个模型的适配器快照, 与设备和 backend 解耦,
/// 可以在 autodiff / 推理两侧的模型之间自由搬运。
/// 层顺序: 自底向上, 每个 block 先 q 后 v。
#[derive(Clone, Debug)]
pub struct AdapterState {
    pub layers: Vec<LoraTensors>,
}

impl AdapterState {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

/// 适配器持久化容器。只有 A/B 是 `Param`, 基座权重作为常量
/// 不进 record, 存盘文件里只有适配器本身。
#[derive(Module, Debug)]
pub struct AdapterBank<B: Backend> {
    pub layers: Vec<LoraLinear<B>>,
}

impl<B: Backend> AdapterBank<B> {
    pub fn new(layers: Vec<LoraLinear<B>>) -> Self {
        Self { layers }
    }

    /// 转成 host 侧快照
    pub fn export(&self) -> AdapterState {
        AdapterState {
            layers: self.layers.iter().map(LoraLinear::export).collect(),
        }
    }

    pub fn import(mut self, state: &AdapterState, device: &B::Device) -> anyhow::Result<Self> {
        if state.num_layers() != self.layers.len() {
            bail!(
                "适配器层数不匹配: 期望 {}, 实际 {}",
                self.layers.len(),
                state.num_layers()
            );
        }
        self.layers = self
            .layers
            .into_iter()
            .zip(&state.layers)
            .map(|(layer, tensors)| layer.import(tensors, device))
            .collect();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{get_device, MyBackend};

    type TestBackend = MyBackend;

    #[test]
    fn test_lora_starts_as_identity_delta() {
        let device = get_device();
        let layer = LoraLinear::<TestBackend>::new(8, 8, 2, 4.0, &device);

        let x = Tensor::<TestBackend, 3>::random([1, 3, 8], Distribution::Default, &device);
        let base = x
            .clone()
            .reshape([3, 8])
            .matmul(layer.weight.clone())
            .reshape([1, 3, 8]);
        let out = layer.forward(x);

        // B 零初始化 -> 输出应与纯基座一致
        let diff = (out - base).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_export_import_round_trip() {
        let device = get_device();
        let layer = LoraLinear::<TestBackend>::new(8, 8, 2, 4.0, &device);
        let snapshot = layer.export();

        let other = LoraLinear::<TestBackend>::new(8, 8, 2, 4.0, &device)
            .import(&snapshot, &device);

        let x = Tensor::<TestBackend, 3>::random([1, 2, 8], Distribution::Default, &device);
        let delta_src = layer.forward(x.clone())
            - x.clone()
                .reshape([2, 8])
                .matmul(layer.weight.clone())
                .reshape([1, 2, 8]);
        let delta_dst = other.forward(x.clone())
            - x.reshape([2, 8])
                .matmul(other.weight.clone())
                .reshape([1, 2, 8]);

        // 适配器增量一致 (基座各自随机, 只比较低秩部分)
        let diff = (delta_src - delta_dst).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }
}
