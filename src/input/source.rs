//! 视频源 (Frame sources)
//!
//! 摄像头按整数索引选择; 具体设备/解码由 `SourceOpener` 实现决定。
//! 内置两种源: 目录图片序列回放 与 合成空白帧。

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};

// ========== 帧 ==========

/// 采集帧 (采集线程 → 处理线程 / 叠加渲染)
///
/// 图像用 Arc 共享,交给下游后不再修改; 叠加绘制在副本上进行。
#[derive(Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    pub frame_id: u64, // 帧序号
    pub captured_at: Instant,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("frame_id", &self.frame_id)
            .field("size", &format_args!("{}x{}", self.width(), self.height()))
            .finish()
    }
}

impl Frame {
    pub fn new(image: RgbImage, frame_id: u64) -> Self {
        Self {
            image: Arc::new(image),
            frame_id,
            captured_at: Instant::now(),
        }
    }

    pub fn blank(width: u32, height: u32, frame_id: u64) -> Self {
        Self::new(RgbImage::new(width, height), frame_id)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

// ========== 接口 ==========

/// 帧源: 按自身节奏阻塞读取下一帧
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<RgbImage>;

    fn name(&self) -> String;
}

/// 按索引打开视频源 (open / close / reopen)
pub trait SourceOpener: Send + Sync {
    fn open(&self, index: usize) -> Result<Box<dyn FrameSource>>;
}

impl<F> SourceOpener for F
where
    F: Fn(usize) -> Result<Box<dyn FrameSource>> + Send + Sync,
{
    fn open(&self, index: usize) -> Result<Box<dyn FrameSource>> {
        self(index)
    }
}

/// 固定帧率节拍器
#[derive(Debug)]
struct Pacer {
    interval: Duration,
    next: Instant,
}

impl Pacer {
    fn new(fps: f32) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 30.0 };
        Self {
            interval: Duration::from_secs_f32(1.0 / fps),
            next: Instant::now(),
        }
    }

    fn wait(&mut self) {
        let now = Instant::now();
        if self.next > now {
            std::thread::sleep(self.next - now);
        }
        // 落后太多时不追帧
        self.next = Instant::now().max(self.next) + self.interval;
    }
}

// ========== 合成源 ==========

/// 合成空白帧 (无摄像头时的替身)
pub struct SyntheticSource {
    width: u32,
    height: u32,
    pacer: Pacer,
    count: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: f32) -> Self {
        Self {
            width,
            height,
            pacer: Pacer::new(fps),
            count: 0,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn read(&mut self) -> Result<RgbImage> {
        self.pacer.wait();
        self.count += 1;
        // 轻微亮度变化,便于肉眼确认画面在刷新
        let shade = 24 + (self.count % 16) as u8;
        Ok(RgbImage::from_pixel(
            self.width,
            self.height,
            Rgb([shade, shade, shade + 8]),
        ))
    }

    fn name(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }
}

/// 任意索引都打开合成源
#[derive(Clone, Debug)]
pub struct SyntheticOpener {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
}

impl SourceOpener for SyntheticOpener {
    fn open(&self, _index: usize) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(SyntheticSource::new(self.width, self.height, self.fps)))
    }
}

// ========== 图片序列回放 ==========

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// 循环播放目录中的图片 (按文件名排序)
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    pacer: Pacer,
}

impl ImageSequenceSource {
    pub fn new(dir: impl AsRef<Path>, fps: f32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .with_context(|| format!("opening source directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            bail!("no images found in {}", dir.display());
        }

        Ok(Self {
            dir,
            files,
            cursor: 0,
            pacer: Pacer::new(fps),
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn read(&mut self) -> Result<RgbImage> {
        self.pacer.wait();
        let path = &self.files[self.cursor];
        self.cursor = (self.cursor + 1) % self.files.len();
        let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
        Ok(img.to_rgb8())
    }

    fn name(&self) -> String {
        format!("images:{}", self.dir.display())
    }
}

/// 索引 N → 第 N 个目录
#[derive(Clone, Debug)]
pub struct DirectoryOpener {
    pub dirs: Vec<PathBuf>,
    pub fps: f32,
}

impl SourceOpener for DirectoryOpener {
    fn open(&self, index: usize) -> Result<Box<dyn FrameSource>> {
        let Some(dir) = self.dirs.get(index) else {
            bail!(
                "no video source at index {} ({} configured)",
                index,
                self.dirs.len()
            );
        };
        Ok(Box::new(ImageSequenceSource::new(dir, self.fps)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "crowd-sentinel-{}-{}-{}",
            tag,
            std::process::id(),
            chrono::Local::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_synthetic_source_size() {
        let mut src = SyntheticOpener {
            width: 64,
            height: 48,
            fps: 1000.0,
        }
        .open(3)
        .unwrap();
        let img = src.read().unwrap();
        assert_eq!(img.dimensions(), (64, 48));
    }

    #[test]
    fn test_image_sequence_cycles_sorted() {
        let dir = temp_dir("seq");
        RgbImage::from_pixel(8, 8, Rgb([10, 0, 0]))
            .save(dir.join("b.png"))
            .unwrap();
        RgbImage::from_pixel(8, 8, Rgb([200, 0, 0]))
            .save(dir.join("a.png"))
            .unwrap();
        std::fs::write(dir.join("notes.txt"), "skip me").unwrap();

        let mut src = ImageSequenceSource::new(&dir, 1000.0).unwrap();
        assert_eq!(src.len(), 2);
        assert_eq!(src.read().unwrap().get_pixel(0, 0)[0], 200);
        assert_eq!(src.read().unwrap().get_pixel(0, 0)[0], 10);
        assert_eq!(src.read().unwrap().get_pixel(0, 0)[0], 200);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_directory_opener_rejects_unknown_index() {
        let opener = DirectoryOpener {
            dirs: vec![],
            fps: 30.0,
        };
        let err = opener.open(1).err().unwrap();
        assert!(err.to_string().contains("index 1"));
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = temp_dir("empty");
        assert!(ImageSequenceSource::new(&dir, 30.0).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
