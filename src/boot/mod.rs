//! 부트로더 인터페이스 모듈
//!
//! 부트로더가 넘긴 프레임버퍼/메모리 맵 정보를 보관합니다.

pub mod info;

pub use info::{
    get as get_boot_info, init as init_boot_info, memory_map_len, physical_memory_offset,
    BootHandoff, FrameBufferDescriptor, PixelFormatTag,
};
