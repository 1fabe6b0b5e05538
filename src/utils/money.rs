use chrono::{DateTime, Datelike, Utc};

/// 按万分比计算佣金，四舍五入到美分
pub fn commission_for(purchase_amount: i64, rate_bp: i64) -> i64 {
    let raw = purchase_amount as i128 * rate_bp as i128;
    ((raw + 5_000) / 10_000) as i64
}

/// 自然月差：只比较年月编号，不看天数。
/// 1 月 31 日到 3 月 1 日算 2 个月。
pub fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i32 {
    (to.year() - from.year()) * 12 + (to.month() as i32 - from.month() as i32)
}

/// 结算周期标识 YYYY-MM
pub fn payout_cycle(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// 美分格式化为 "12.34"
pub fn format_cents(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
