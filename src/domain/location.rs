// ==========================================
// 堆场客户池分配引擎 - 箱位位置编码
// ==========================================
// 格式（逐位精确）: S{stackNumber:02}R{row}H{height}，例如 S04R1H1
// 校验: ^S\d{2}R\d+H\d+$，不合法的编码不得向下游传递
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationFormatError {
    #[error("位置编码格式错误: {0}")]
    Malformed(String),

    #[error("箱位编号超出两位编码范围: stack_number={0}")]
    StackNumberOutOfRange(i32),

    #[error("行/层必须为非负数: row={row}, height={height}")]
    NegativeCoordinate { row: i32, height: i32 },
}

// ==========================================
// LocationId - 单元位置（箱位 × 行 × 层）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationId {
    pub stack_number: i32,
    pub row: i32,
    pub height: i32,
}

impl LocationId {
    pub fn new(stack_number: i32, row: i32, height: i32) -> Result<Self, LocationFormatError> {
        if !(0..=99).contains(&stack_number) {
            return Err(LocationFormatError::StackNumberOutOfRange(stack_number));
        }
        if row < 0 || height < 0 {
            return Err(LocationFormatError::NegativeCoordinate { row, height });
        }
        Ok(Self {
            stack_number,
            row,
            height,
        })
    }

    /// 严格解析（整串必须满足编码格式）
    pub fn parse(raw: &str) -> Result<Self, LocationFormatError> {
        let malformed = || LocationFormatError::Malformed(raw.to_string());

        let rest = raw.strip_prefix('S').ok_or_else(malformed)?;
        let r_pos = rest.find('R').ok_or_else(malformed)?;
        let (stack_part, rest) = rest.split_at(r_pos);
        let rest = &rest[1..];
        let h_pos = rest.find('H').ok_or_else(malformed)?;
        let (row_part, height_part) = rest.split_at(h_pos);
        let height_part = &height_part[1..];

        if stack_part.len() != 2 || !all_digits(stack_part) {
            return Err(malformed());
        }
        if !all_digits(row_part) || !all_digits(height_part) {
            return Err(malformed());
        }

        let stack_number = stack_part.parse::<i32>().map_err(|_| malformed())?;
        let row = row_part.parse::<i32>().map_err(|_| malformed())?;
        let height = height_part.parse::<i32>().map_err(|_| malformed())?;
        Self::new(stack_number, row, height)
    }

    /// 从自由文本中提取第一个合法位置编码（历史数据回填用）
    ///
    /// 历史库存记录里的位置字段可能带有前后缀或小写，例如 "yard1/s04r2h3 (hold)"。
    pub fn extract(text: &str) -> Option<Self> {
        let upper = text.to_ascii_uppercase();
        let bytes = upper.as_bytes();
        for (start, _) in upper.match_indices('S') {
            let mut end = start + 1;
            // S + 两位 + R + 数字 + H + 数字
            let mut stage = 0;
            let mut digits = 0;
            while end < bytes.len() {
                let c = bytes[end];
                match (stage, c) {
                    (0, b'0'..=b'9') | (1, b'0'..=b'9') | (2, b'0'..=b'9') => digits += 1,
                    (0, b'R') if digits == 2 => {
                        stage = 1;
                        digits = 0;
                    }
                    (1, b'H') if digits > 0 => {
                        stage = 2;
                        digits = 0;
                    }
                    _ => break,
                }
                end += 1;
            }
            if stage == 2 && digits > 0 {
                if let Ok(id) = Self::parse(&upper[start..end]) {
                    return Some(id);
                }
            }
        }
        None
    }

    /// 格式化并校验；输出必定满足编码格式
    pub fn format_checked(&self) -> Result<String, LocationFormatError> {
        let formatted = self.to_string();
        if is_valid_location_format(&formatted) {
            Ok(formatted)
        } else {
            Err(LocationFormatError::Malformed(formatted))
        }
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{:02}R{}H{}", self.stack_number, self.row, self.height)
    }
}

/// 等价于 ^S\d{2}R\d+H\d+$
pub fn is_valid_location_format(raw: &str) -> bool {
    let Some(rest) = raw.strip_prefix('S') else {
        return false;
    };
    let bytes = rest.as_bytes();
    if bytes.len() < 2 || !bytes[..2].iter().all(u8::is_ascii_digit) {
        return false;
    }
    let Some(rest) = rest[2..].strip_prefix('R') else {
        return false;
    };
    let Some(h_pos) = rest.find('H') else {
        return false;
    };
    all_digits(&rest[..h_pos]) && all_digits(&rest[h_pos + 1..])
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_zero_padded() {
        let id = LocationId::new(4, 1, 1).unwrap();
        assert_eq!(id.to_string(), "S04R1H1");
        assert_eq!(id.format_checked().unwrap(), "S04R1H1");

        let id = LocationId::new(57, 12, 5).unwrap();
        assert_eq!(id.to_string(), "S57R12H5");
    }

    #[test]
    fn test_out_of_range_stack_number() {
        assert_eq!(
            LocationId::new(101, 1, 1),
            Err(LocationFormatError::StackNumberOutOfRange(101))
        );
    }

    #[test]
    fn test_parse_strict() {
        assert_eq!(
            LocationId::parse("S04R2H3").unwrap(),
            LocationId::new(4, 2, 3).unwrap()
        );
        for bad in ["S4R1H1", "S004R1H1", "S04R1", "S04RH1", "X04R1H1", "S04R1H1 ", "s04r1h1", "S04R-1H1"] {
            assert!(LocationId::parse(bad).is_err(), "{} 应解析失败", bad);
        }
    }

    #[test]
    fn test_format_validator() {
        assert!(is_valid_location_format("S04R1H1"));
        assert!(is_valid_location_format("S99R10H12"));
        assert!(!is_valid_location_format("S100R1H1"));
        assert!(!is_valid_location_format("S04R1H"));
        assert!(!is_valid_location_format("S04R1H1X"));
    }

    #[test]
    fn test_extract_from_free_text() {
        assert_eq!(
            LocationId::extract("yard1/s04r2h3 (hold)"),
            Some(LocationId::new(4, 2, 3).unwrap())
        );
        assert_eq!(
            LocationId::extract("GATE S7 / S07R1H2"),
            Some(LocationId::new(7, 1, 2).unwrap())
        );
        assert_eq!(LocationId::extract("on chassis"), None);
        assert_eq!(LocationId::extract("S123R1H1"), None);
    }
}
