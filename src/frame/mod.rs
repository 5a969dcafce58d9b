mod pool;
mod processor;
mod types;

pub use pool::{BufferPool, PoolStats, PoolToken, PooledBuffer, DEFAULT_POOL_CAPACITY};
pub use processor::{ConvertedFrame, FrameProcessor};
pub use types::{
    Channel16u, Channel16uRef, Channel8u, Channel8uRef, ChannelPool16u, ChannelPool8u, FramePools,
    PixelFormat, Roi, Surface8u, Surface8uRef, SurfacePool8u,
};
