use image::{ DynamicImage, GrayImage, RgbaImage };
use rand::Rng;

/// Alphabet used for result identifiers.
const IDENTIFIER_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generates a random string of `len` characters from `[0-9a-z]`.
/// Collisions are possible and not checked.
pub fn random_identifier(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| IDENTIFIER_CHARS[rng.gen_range(0..IDENTIFIER_CHARS.len())] as char)
        .collect()
}

/// Case-insensitive suffix test, `"clip.MP4"` ends with `".mp4"`.
pub fn has_ending_insensitive(name: &str, ending: &str) -> bool {
    name.len() >= ending.len()
        && name.is_char_boundary(name.len() - ending.len())
        && name[name.len() - ending.len()..].eq_ignore_ascii_case(ending)
}

// tensor 的展开机制是先 y 再 x, 每一行取最大值的下标
pub fn argmax_in_axis0(input: &[f32], shape: &[usize]) -> Vec<usize> {
    input.chunks(shape[1]).map(|v: &[f32]| {
        let mut max = v[0];
        let mut index = 0;
        v.iter().enumerate().for_each(|(i, v_in_v)| {
            if *v_in_v >= max {
                max = *v_in_v;
                index = i;
            }
        });
        index
    }).collect()
}

pub fn transpose(input: &DynamicImage) -> DynamicImage {
    let img = input.to_rgba8();
    let mut output = RgbaImage::new(img.height(), img.width());
    img.enumerate_pixels().for_each(|(x, y, pixel)| {
        output.put_pixel(y, x, *pixel);
    });
    DynamicImage::ImageRgba8(output)
}

pub fn equalize_hist_in_gray(img: &DynamicImage) -> DynamicImage {
    let img = img.to_luma8();
    let mut vec = img.to_vec();
    let len = vec.len();

    // 分布函数
    let mut df = [0usize; 256];
    for v in &vec {
        df[*v as usize] += 1;
    }
    // cdf
    let mut temp = df[0];
    df.iter_mut().skip(1).for_each(|v| {
        *v += temp;
        temp = *v;
    });
    let cdf_min = match df.iter().find(|v| **v != 0) {
        Some(min) => *min,
        None => return DynamicImage::ImageLuma8(img),
    };
    // flat image, nothing to stretch
    if len == cdf_min {
        return DynamicImage::ImageLuma8(img);
    }
    vec.iter_mut().for_each(|v| {
        let x = df[*v as usize] - cdf_min;
        let y = len - cdf_min;
        *v = ((x as f32/y as f32)*255.0).round() as u8;
    });
    match GrayImage::from_raw(img.width(), img.height(), vec) {
        Some(equalized) => DynamicImage::ImageLuma8(equalized),
        None => DynamicImage::ImageLuma8(img),
    }
}


#[cfg(test)]
mod test {

    use image::{ DynamicImage, GenericImageView, GrayImage, Luma, Rgba, RgbaImage };

    use super::*;

    #[test]
    fn identifiers_stay_in_alphabet() {
        for _ in 0..10_000 {
            let id = random_identifier(12);
            assert_eq!(id.len(), 12);
            assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()), "{}", id);
        }
    }

    #[test]
    fn ending_ignores_case() {
        assert!(has_ending_insensitive("foo.MP4", ".mp4"));
        assert!(has_ending_insensitive("a/b/PLATE.JpEg", ".jpeg"));
        assert!(!has_ending_insensitive("mp4", ".mp4"));
        assert!(!has_ending_insensitive("clip.mp4.txt", ".mp4"));
        assert!(!has_ending_insensitive("车牌", ".jpg"));
    }

    #[test]
    fn argmax_per_row() {
        let v = vec![0.1, 0.7, 0.2, 0.9, 0.05, 0.05];
        assert_eq!(argmax_in_axis0(&v, &[2, 3]), vec![1, 0]);
    }

    #[test]
    fn transpose_swaps_axes() {
        let mut img = RgbaImage::new(3, 2);
        img.put_pixel(2, 1, Rgba([9, 9, 9, 255]));
        let out = transpose(&DynamicImage::ImageRgba8(img));
        assert_eq!(out.dimensions(), (2, 3));
        assert_eq!(out.get_pixel(1, 2), Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn equalize_stretches_to_full_range() {
        let img = GrayImage::from_fn(4, 1, |x, _| Luma([100 + x as u8]));
        let out = equalize_hist_in_gray(&DynamicImage::ImageLuma8(img)).to_luma8();
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(3, 0)[0], 255);

        let flat = GrayImage::from_pixel(3, 3, Luma([42]));
        let out = equalize_hist_in_gray(&DynamicImage::ImageLuma8(flat)).to_luma8();
        assert!(out.pixels().all(|p| p[0] == 42));
    }
}
