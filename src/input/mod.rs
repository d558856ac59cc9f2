/// 视频输入 (Video input)
///
/// - Source:  视频源接口 + 内置实现 (图片序列 / 合成帧)
/// - Capture: 采集线程 + 最新帧槽位
pub mod capture;
pub mod source;

pub use capture::{CaptureWorker, FrameSlot};
pub use source::{
    DirectoryOpener, Frame, FrameSource, ImageSequenceSource, SourceOpener, SyntheticOpener,
    SyntheticSource,
};
