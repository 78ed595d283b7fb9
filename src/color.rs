//! 主色与调色板提取
//!
//! 颜色使用改进的中位切分法量化：像素先落入每通道 5 位的直方图，
//! 再把有像素的颜色空间切分为若干盒子（先按像素数，再按像素数 × 体积），
//! 每个盒子取平均值作为调色板中的一种颜色。
//! 算法没有随机初始化，
//! 同一张图片总是得到相同的颜色特征

use std::cmp::Reverse;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use image::{ImageReader, RgbaImage};
use serde::{Serialize, Serializer};

use crate::error::ColorError;

const SIGBITS: u32 = 5;
const RSHIFT: u32 = 8 - SIGBITS;
const BINS: u8 = 1 << SIGBITS;
const HIST_SIZE: usize = 1 << (3 * SIGBITS);
const MAX_ITERATIONS: usize = 1000;
/// 只按像素数切分产生的调色板比例
const FRACT_BY_POPULATION: f64 = 0.75;
/// 透明度高于此值的像素会被忽略
const MIN_ALPHA: u8 = 125;
/// 各通道都高于此值的像素视为白色背景
const WHITE_THRESHOLD: u8 = 250;

/// 以 `#rrggbb` 表示的 sRGB 颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorHex([u8; 3]);

impl ColorHex {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    pub fn rgb(&self) -> [u8; 3] {
        self.0
    }
}

impl fmt::Display for ColorHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02x}{g:02x}{b:02x}")
    }
}

impl FromStr for ColorHex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix('#').ok_or_else(|| format!("missing '#': {s}"))?;
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(format!("invalid color: {s}"));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| format!("invalid color: {s}"))
        };
        Ok(Self([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl Serialize for ColorHex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorOptions {
    /// 调色板颜色数量，返回结果总是恰好这么多
    pub palette_size: usize,
    /// 每隔 n 个像素采样一次，为 1 时读取全部像素
    pub quality: usize,
}

impl Default for ColorOptions {
    fn default() -> Self {
        Self { palette_size: 5, quality: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorSignature {
    pub dominant: ColorHex,
    /// 按聚类权重从大到小排列，`palette[0] == dominant`
    pub palette: Vec<ColorHex>,
}

impl ColorSignature {
    /// 解码 `path` 处的图片并计算颜色特征
    pub fn compute(path: &Path, opts: &ColorOptions) -> Result<Self, ColorError> {
        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?.into_rgba8();
        Self::from_image(&image, opts)
    }

    pub fn from_image(image: &RgbaImage, opts: &ColorOptions) -> Result<Self, ColorError> {
        let size = opts.palette_size.max(1);
        let pixels = sample_pixels(image, opts.quality);
        let mut palette: Vec<ColorHex> =
            quantize(&pixels, size).into_iter().map(|(color, _)| color).collect();

        let Some(&last) = palette.last() else {
            return Err(ColorError::NoPixels);
        };
        // 图片颜色不足时重复最小的聚类
        palette.resize(size, last);

        Ok(Self { dominant: palette[0], palette })
    }
}

/// 收集不透明像素，跳过接近白色的像素，除非只剩下白色
fn sample_pixels(image: &RgbaImage, quality: usize) -> Vec<[u8; 3]> {
    let mut opaque = vec![];
    let mut colored = vec![];
    for pixel in image.pixels().step_by(quality.max(1)) {
        let [r, g, b, a] = pixel.0;
        if a < MIN_ALPHA {
            continue;
        }
        opaque.push([r, g, b]);
        if !(r > WHITE_THRESHOLD && g > WHITE_THRESHOLD && b > WHITE_THRESHOLD) {
            colored.push([r, g, b]);
        }
    }
    if colored.is_empty() { opaque } else { colored }
}

struct Histogram {
    counts: Vec<u64>,
    sums: Vec<[u64; 3]>,
}

impl Histogram {
    fn new(pixels: &[[u8; 3]]) -> Self {
        let mut counts = vec![0; HIST_SIZE];
        let mut sums = vec![[0; 3]; HIST_SIZE];
        for &[r, g, b] in pixels {
            let idx = index([r >> RSHIFT, g >> RSHIFT, b >> RSHIFT]);
            counts[idx] += 1;
            sums[idx][0] += r as u64;
            sums[idx][1] += g as u64;
            sums[idx][2] += b as u64;
        }
        Self { counts, sums }
    }
}

fn index([r, g, b]: [u8; 3]) -> usize {
    ((r as usize) << (2 * SIGBITS)) | ((g as usize) << SIGBITS) | b as usize
}

/// 遍历闭区间盒子 `lo..=hi` 中的每个格子
fn bins(lo: [u8; 3], hi: [u8; 3]) -> impl Iterator<Item = [u8; 3]> {
    (lo[0]..=hi[0]).flat_map(move |r| {
        (lo[1]..=hi[1]).flat_map(move |g| (lo[2]..=hi[2]).map(move |b| [r, g, b]))
    })
}

/// 量化颜色空间中的盒子，总是收缩到有像素的格子
#[derive(Debug, Clone, Copy)]
struct VBox {
    lo: [u8; 3],
    hi: [u8; 3],
    count: u64,
}

impl VBox {
    /// `lo..=hi` 中有像素的格子的最小包围盒，全部为空时返回 `None`
    fn shrink(hist: &Histogram, lo: [u8; 3], hi: [u8; 3]) -> Option<Self> {
        let mut count = 0;
        let mut min = [BINS - 1; 3];
        let mut max = [0; 3];
        for bin in bins(lo, hi) {
            let n = hist.counts[index(bin)];
            if n == 0 {
                continue;
            }
            count += n;
            for c in 0..3 {
                min[c] = min[c].min(bin[c]);
                max[c] = max[c].max(bin[c]);
            }
        }
        (count > 0).then_some(Self { lo: min, hi: max, count })
    }

    fn volume(&self) -> u64 {
        (0..3).map(|c| (self.hi[c] - self.lo[c]) as u64 + 1).product()
    }

    fn average(&self, hist: &Histogram) -> ColorHex {
        let mut sum = [0u64; 3];
        for bin in bins(self.lo, self.hi) {
            let s = hist.sums[index(bin)];
            for c in 0..3 {
                sum[c] += s[c];
            }
        }
        let avg = |c: usize| (sum[c] / self.count).min(255) as u8;
        ColorHex::new(avg(0), avg(1), avg(2))
    }

    /// 在最长轴上按像素数中位数切分盒子
    fn split(&self, hist: &Histogram) -> Option<(Self, Self)> {
        // 长度相同时优先 r，其次 g
        let axis = (0..3).max_by_key(|&c| (self.hi[c] - self.lo[c], Reverse(c)))?;
        let (lo, hi) = (self.lo[axis], self.hi[axis]);
        if lo == hi {
            return None;
        }

        let mut cut = hi - 1;
        let mut acc = 0;
        for v in lo..hi {
            let (mut slice_lo, mut slice_hi) = (self.lo, self.hi);
            slice_lo[axis] = v;
            slice_hi[axis] = v;
            acc += bins(slice_lo, slice_hi).map(|bin| hist.counts[index(bin)]).sum::<u64>();
            if acc * 2 >= self.count {
                cut = v;
                break;
            }
        }

        let mut hi1 = self.hi;
        hi1[axis] = cut;
        let mut lo2 = self.lo;
        lo2[axis] = cut + 1;
        // 两端切片都有像素，所以切分后两半都不为空
        Some((Self::shrink(hist, self.lo, hi1)?, Self::shrink(hist, lo2, self.hi)?))
    }
}

/// 按 `priority` 顺序切分盒子，直到数量达到 `target` 或无法再切分
fn split_boxes(hist: &Histogram, boxes: &mut Vec<VBox>, target: usize, priority: fn(&VBox) -> u64) {
    let mut solid = vec![];
    for _ in 0..MAX_ITERATIONS {
        if boxes.len() + solid.len() >= target {
            break;
        }
        let Some(pos) = boxes
            .iter()
            .enumerate()
            .max_by_key(|(i, b)| (priority(b), Reverse(*i)))
            .map(|(i, _)| i)
        else {
            break;
        };
        let vbox = boxes.remove(pos);
        match vbox.split(hist) {
            Some((a, b)) => {
                boxes.push(a);
                boxes.push(b);
            }
            None => solid.push(vbox),
        }
    }
    boxes.append(&mut solid);
}

/// 将 `pixels` 量化为最多 `max_colors` 种颜色及其像素数，按像素数从多到少排列
pub fn quantize(pixels: &[[u8; 3]], max_colors: usize) -> Vec<(ColorHex, u64)> {
    if pixels.is_empty() || max_colors == 0 {
        return vec![];
    }
    let hist = Histogram::new(pixels);
    let Some(root) = VBox::shrink(&hist, [0; 3], [BINS - 1; 3]) else {
        return vec![];
    };

    let mut boxes = vec![root];
    let by_population = ((max_colors as f64 * FRACT_BY_POPULATION).ceil() as usize).max(1);
    split_boxes(&hist, &mut boxes, by_population, |b| b.count);
    split_boxes(&hist, &mut boxes, max_colors, |b| b.count * b.volume());

    let mut palette: Vec<_> = boxes.iter().map(|b| (b.average(&hist), b.count)).collect();
    palette.sort_by_key(|&(_, count)| Reverse(count));
    palette
}
