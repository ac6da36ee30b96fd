use burn::backend::Autodiff;

#[cfg(all(feature = "ndarray", not(any(feature = "wgpu", feature = "cuda"))))]
mod ndarray_backend {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    pub type MyBackend = NdArray;
    pub type MyAutodiffBackend = Autodiff<NdArray>;
    pub type MyDevice = NdArrayDevice;

    pub fn get_device() -> MyDevice {
        NdArrayDevice::Cpu
    }
}

#[cfg(feature = "wgpu")]
mod wgpu_backend {
    use super::*;
    use burn_wgpu::{Wgpu, WgpuDevice};

    pub type MyBackend = Wgpu;
    pub type MyAutodiffBackend = Autodiff<Wgpu>;
    pub type MyDevice = WgpuDevice;

    pub fn get_device() -> MyDevice {
        WgpuDevice::default()
    }
}

#[cfg(feature = "cuda")]
mod cuda_backend {
    use super::*;
    use burn_tch::{LibTorch, LibTorchDevice};

    pub type MyBackend = LibTorch;
    pub type MyAutodiffBackend = Autodiff<LibTorch>;
    pub type MyDevice = LibTorchDevice;

    pub fn get_device() -> MyDevice {
        LibTorchDevice::Cuda(0)
    }
}

#[cfg(all(feature = "ndarray", not(any(feature = "wgpu", feature = "cuda"))))]
pub use ndarray_backend::*;

#[cfg(feature = "wgpu")]
pub use wgpu_backend::*;

#[cfg(all(feature = "cuda", not(feature = "wgpu")))]
pub use cuda_backend::*;
