//! 学習モードのエンジンが出力する特徴量文字列のデコード

use katyusha_net::FeatureVector;

/// 特徴量文字列の不備の内容
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FeatureDefect {
    #[error("token {index} ({token:?}) is not a finite number")]
    NonNumeric { index: usize, token: String },
    #[error("expected {expected} values, got {actual}")]
    WidthMismatch { expected: usize, actual: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("malformed feature data: {0}")]
    MalformedFeatureData(#[from] FeatureDefect),
}

/// カンマ区切りの数値列を `expected_width` 次元の特徴量ベクトルに変換する。
pub fn decode_features(text: &str, expected_width: usize) -> Result<FeatureVector, DecodeError> {
    let mut values = Vec::with_capacity(expected_width);
    for (index, raw) in text.trim().split(',').enumerate() {
        let token = raw.trim();
        let value = token
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| FeatureDefect::NonNumeric { index, token: token.to_string() })?;
        values.push(value);
    }
    if values.len() != expected_width {
        return Err(FeatureDefect::WidthMismatch { expected: expected_width, actual: values.len() }.into());
    }
    Ok(FeatureVector::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_formed_line() {
        let fv = decode_features(" 1.0, 0,-2.5,3e-1 ", 4).unwrap();
        assert_eq!(fv.as_slice(), &[1.0, 0.0, -2.5, 0.3]);
    }

    #[test]
    fn empty_token_is_malformed() {
        let err = decode_features("1.0,,3.0", 3).unwrap_err();
        assert_eq!(
            err,
            DecodeError::MalformedFeatureData(FeatureDefect::NonNumeric { index: 1, token: String::new() })
        );
    }

    #[test]
    fn non_numeric_and_nan_are_malformed() {
        assert!(decode_features("1,abc,3", 3).is_err());
        assert!(decode_features("1,NaN,3", 3).is_err());
    }

    #[test]
    fn width_mismatch_is_malformed() {
        let err = decode_features("1,2,3", 4).unwrap_err();
        assert_eq!(
            err,
            DecodeError::MalformedFeatureData(FeatureDefect::WidthMismatch { expected: 4, actual: 3 })
        );
    }
}
