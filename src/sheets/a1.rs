//! A1 表示法
//!
//! 行列均从 1 开始：第 1 列 = `A`，第 27 列 = `AA`，第 62 列 = `BJ`。

use crate::error::SheetError;

/// 列号转列字母
pub fn column_letter(column: u32) -> Result<String, SheetError> {
    if column == 0 {
        return Err(SheetError::InvalidCell { row: 0, column });
    }
    let mut n = column;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    Ok(letters.iter().rev().collect())
}

/// 列字母转列号，大小写不敏感
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        acc.checked_mul(26)?.checked_add(c as u32 - 'A' as u32 + 1)
    })
}

/// 单元格地址，例如 `BJ5`
pub fn cell(row: u32, column: u32) -> Result<String, SheetError> {
    if row == 0 {
        return Err(SheetError::InvalidCell { row, column });
    }
    Ok(format!("{}{}", column_letter(column)?, row))
}

/// 从 `start_row` 到表尾的列区间，例如 `B5:C`
pub fn open_range(start_row: u32, first_column: u32, last_column: u32) -> Result<String, SheetError> {
    Ok(format!(
        "{}:{}",
        cell(start_row, first_column)?,
        column_letter(last_column)?
    ))
}

/// 加上工作表名，例如 `'상품목록'!B5:C`
pub fn qualified(sheet_name: &str, range: &str) -> String {
    if sheet_name.is_empty() {
        return range.to_string();
    }
    format!("'{}'!{}", sheet_name.replace('\'', "''"), range)
}

/// 解析后的区间，`end_row` 为空表示到表尾
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRef {
    pub start_row: u32,
    pub start_column: u32,
    pub end_row: Option<u32>,
    pub end_column: u32,
}

/// 解析 `B5`、`B5:C`、`A1:BJ100`（可以带工作表名前缀）
pub fn parse_range(range: &str) -> Option<RangeRef> {
    let range = range.rsplit_once('!').map_or(range, |(_, r)| r);
    let (start, end) = range.split_once(':').unwrap_or((range, range));
    let (start_column, start_row) = split_cell(start)?;
    let (end_column, end_row) = split_cell(end)?;
    Some(RangeRef {
        start_row: start_row.unwrap_or(1),
        start_column,
        end_row,
        end_column,
    })
}

fn split_cell(cell: &str) -> Option<(u32, Option<u32>)> {
    let cell = cell.trim();
    let digits_at = cell.find(|c: char| c.is_ascii_digit()).unwrap_or(cell.len());
    let column = column_index(&cell[..digits_at])?;
    let row = match &cell[digits_at..] {
        "" => None,
        digits => Some(digits.parse().ok()?),
    };
    Some((column, row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(1).unwrap(), "A");
        assert_eq!(column_letter(26).unwrap(), "Z");
        assert_eq!(column_letter(27).unwrap(), "AA");
        assert_eq!(column_letter(60).unwrap(), "BH");
        assert_eq!(column_letter(62).unwrap(), "BJ");
        assert!(column_letter(0).is_err());
    }

    #[test]
    fn column_indices() {
        assert_eq!(column_index("A"), Some(1));
        assert_eq!(column_index("bi"), Some(61));
        assert_eq!(column_index("AX"), Some(50));
        assert_eq!(column_index("A1"), None);
        assert_eq!(column_index(""), None);
    }

    #[test]
    fn ranges() {
        assert_eq!(cell(5, 62).unwrap(), "BJ5");
        assert_eq!(open_range(5, 2, 3).unwrap(), "B5:C");
        assert_eq!(qualified("상품", "B5:C"), "'상품'!B5:C");
        assert!(cell(0, 1).is_err());
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(
            parse_range("'Sheet1'!BH5:BI"),
            Some(RangeRef {
                start_row: 5,
                start_column: 60,
                end_row: None,
                end_column: 61
            })
        );
        assert_eq!(
            parse_range("D7"),
            Some(RangeRef {
                start_row: 7,
                start_column: 4,
                end_row: Some(7),
                end_column: 4
            })
        );
        assert_eq!(parse_range("5:7"), None);
    }
}
