use std::str::FromStr;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{CouponView, CreateCoupon, OrderFilter, Period, UpdatePrice};
use crate::util::escape_html;

use super::{BotConsole, Pending, broadcast};

const ORDERS_SHOWN: i64 = 10;
const KEYS_SHOWN: usize = 50;

const HELP: &str = "<b>Shop console</b>
/keys [period] - stock counts, or the keys of one pool
/addkey &lt;period&gt; - add keys (one per line, below or in the next message)
/delkey &lt;period&gt; &lt;key&gt; - remove a key
/coupons - list coupons
/addcoupon &lt;CODE&gt; &lt;discount&gt; &lt;uses|unlimited&gt; [YYYY-MM-DD|-] [periods,...]
/delcoupon &lt;CODE&gt; - delete a coupon
/prices - list prices
/setprice &lt;period&gt; &lt;amount&gt; [label] - change a price
/orders [paid|pending|all] - latest orders
/stats - totals
/broadcast &lt;text&gt; - message every subscriber
/sync - pull key pools from the mirror
/cancel - abort the current step";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Keys(Option<String>),
    AddKey { period: String, keys: Vec<String> },
    DelKey { period: String, key: String },
    Coupons,
    AddCoupon(Vec<String>),
    DelCoupon(String),
    Prices,
    SetPrice { period: String, amount: String, label: Option<String> },
    Orders(Option<String>),
    Stats,
    Broadcast(Option<String>),
    Sync,
    Cancel,
    /// Known command with missing arguments; carries the usage line
    Usage(&'static str),
    Unknown(String),
}

impl Command {
    /// Parse a message. `None` when the text is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let body = text.strip_prefix('/')?;

        let (first_line, rest_lines) = body.split_once('\n').unwrap_or((body, ""));
        let mut words = first_line.split_whitespace();
        let name = words.next().unwrap_or_default();
        // "/keys@shop_bot" in group chats
        let name = name.split('@').next().unwrap_or_default().to_lowercase();
        let args: Vec<String> = words.map(str::to_string).collect();
        let arg = |i: usize| args.get(i).cloned();

        let command = match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "keys" => Command::Keys(arg(0)),
            "addkey" => match arg(0) {
                Some(period) => Command::AddKey {
                    period,
                    keys: args[1..]
                        .iter()
                        .map(String::as_str)
                        .chain(rest_lines.lines())
                        .map(|k| k.trim().to_string())
                        .filter(|k| !k.is_empty())
                        .collect(),
                },
                None => Command::Usage("/addkey <period>"),
            },
            "delkey" => match (arg(0), arg(1)) {
                (Some(period), Some(key)) => Command::DelKey { period, key },
                _ => Command::Usage("/delkey <period> <key>"),
            },
            "coupons" => Command::Coupons,
            "addcoupon" if args.len() >= 3 => Command::AddCoupon(args),
            "addcoupon" => Command::Usage(
                "/addcoupon <CODE> <discount> <uses|unlimited> [YYYY-MM-DD|-] [periods,...]",
            ),
            "delcoupon" => match arg(0) {
                Some(code) => Command::DelCoupon(code),
                None => Command::Usage("/delcoupon <CODE>"),
            },
            "prices" => Command::Prices,
            "setprice" => match (arg(0), arg(1)) {
                (Some(period), Some(amount)) => Command::SetPrice {
                    period,
                    amount,
                    label: (args.len() > 2).then(|| args[2..].join(" ")),
                },
                _ => Command::Usage("/setprice <period> <amount> [label]"),
            },
            "orders" => Command::Orders(arg(0)),
            "stats" => Command::Stats,
            "broadcast" => {
                let message = body
                    .split_once(char::is_whitespace)
                    .map(|(_, text)| text.trim().to_string())
                    .filter(|text| !text.is_empty());
                Command::Broadcast(message)
            }
            "sync" => Command::Sync,
            "cancel" => Command::Cancel,
            other => Command::Unknown(other.to_string()),
        };
        Some(command)
    }
}

fn parse_period(value: &str) -> Result<Period> {
    Period::parse(value).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Unknown period '{}'. Use one of: {}",
            value,
            Period::all().map(|p| p.code()).collect::<Vec<_>>().join(", ")
        ))
    })
}

fn format_coupon(view: &CouponView) -> String {
    let uses = if view.unlimited {
        "unlimited".to_string()
    } else {
        format!("{} uses left", view.uses_left)
    };
    let types = if view.types.is_empty() {
        "all".to_string()
    } else {
        view.types.join(",")
    };
    format!(
        "<code>{}</code> {}% ({}, expires {}, for {})",
        escape_html(&view.code),
        view.discount,
        uses,
        escape_html(view.expires_at.as_deref().unwrap_or("never")),
        types
    )
}

pub(super) async fn execute(console: &BotConsole, chat_id: i64, command: Command) -> Result<String> {
    let state = console.state();
    match command {
        Command::Start | Command::Help => Ok(HELP.to_string()),

        Command::Keys(None) => {
            let mut lines = vec!["<b>Stock</b>".to_string()];
            for period in Period::all() {
                lines.push(format!(
                    "{} ({}): {}",
                    period.display_label(),
                    period.code(),
                    state.keys.count(period)?
                ));
            }
            Ok(lines.join("\n"))
        }
        Command::Keys(Some(period)) => {
            let period = parse_period(&period)?;
            let keys = state.keys.list(period)?;
            if keys.is_empty() {
                return Ok(format!("No keys left for {}.", period.display_label()));
            }
            let mut lines = vec![format!(
                "<b>{}</b>: {} keys",
                period.display_label(),
                keys.len()
            )];
            lines.extend(
                keys.iter()
                    .take(KEYS_SHOWN)
                    .map(|k| format!("<code>{}</code>", escape_html(k))),
            );
            if keys.len() > KEYS_SHOWN {
                lines.push(format!("... and {} more", keys.len() - KEYS_SHOWN));
            }
            Ok(lines.join("\n"))
        }

        Command::AddKey { period, keys } => {
            let period = parse_period(&period)?;
            if keys.is_empty() {
                console.conversations().set(chat_id, Pending::Keys(period));
                return Ok(format!(
                    "Send the {} keys, one per line. /cancel to stop.",
                    period.display_label()
                ));
            }
            add_keys(console, period, &keys).await
        }
        Command::DelKey { period, key } => {
            let period = parse_period(&period)?;
            if !state.keys.remove_key(period, &key)? {
                return Ok(format!("Key <code>{}</code> is not in that pool.", escape_html(&key)));
            }
            tracing::info!(chat_id, period = %period, "Key removed from bot");
            state.mirror_pool(period).await;
            Ok(format!("Removed <code>{}</code>.", escape_html(&key)))
        }

        Command::Coupons => {
            let coupons = state.coupons.list()?;
            if coupons.is_empty() {
                return Ok("No active coupons.".to_string());
            }
            let lines: Vec<String> = coupons
                .iter()
                .map(|(code, coupon)| format_coupon(&CouponView::new(code, coupon)))
                .collect();
            Ok(lines.join("\n"))
        }
        Command::AddCoupon(args) => {
            let input = parse_coupon_args(&args)?;
            let view = state.coupons.create(input)?;
            tracing::info!(chat_id, code = %view.code, "Coupon created from bot");
            Ok(format!("Created {}", format_coupon(&view)))
        }
        Command::DelCoupon(code) => {
            let code = code.to_uppercase();
            if state.coupons.delete(&code)? {
                tracing::info!(chat_id, code = %code, "Coupon deleted from bot");
                Ok(format!("Deleted <code>{}</code>.", escape_html(&code)))
            } else {
                Ok(format!("Coupon <code>{}</code> not found.", escape_html(&code)))
            }
        }

        Command::Prices => {
            let lines: Vec<String> = state
                .prices
                .all()?
                .into_iter()
                .map(|(period, price)| {
                    format!(
                        "{} ({}): {} {}",
                        escape_html(&price.label),
                        period.code(),
                        price.amount,
                        escape_html(&price.currency)
                    )
                })
                .collect();
            Ok(lines.join("\n"))
        }
        Command::SetPrice {
            period,
            amount,
            label,
        } => {
            let period = parse_period(&period)?;
            let amount: i64 = amount
                .replace([',', '.'], "")
                .parse()
                .ok()
                .filter(|a| *a > 0)
                .ok_or_else(|| AppError::BadRequest(format!("Invalid amount '{}'", amount)))?;
            let price = state.prices.set(
                period,
                UpdatePrice {
                    label,
                    amount,
                    currency: None,
                },
            )?;
            tracing::info!(chat_id, period = %period, amount, "Price updated from bot");
            Ok(format!(
                "{} ({}) now costs {} {}.",
                escape_html(&price.label),
                period.code(),
                price.amount,
                escape_html(&price.currency)
            ))
        }

        Command::Orders(filter) => {
            let filter = match filter {
                Some(f) => OrderFilter::from_str(&f.to_lowercase()).map_err(|_| {
                    AppError::BadRequest("Filter must be paid, pending or all".into())
                })?,
                None => OrderFilter::All,
            };
            let conn = state.db.get()?;
            let orders = queries::list_orders(&conn, filter, ORDERS_SHOWN)?;
            if orders.is_empty() {
                return Ok("No orders.".to_string());
            }
            let lines: Vec<String> = orders
                .iter()
                .map(|o| {
                    format!(
                        "<code>{}</code> {} {} {}",
                        escape_html(&o.uid),
                        if o.paid { "paid" } else { "pending" },
                        escape_html(o.email.as_deref().unwrap_or("-")),
                        escape_html(o.key.as_deref().unwrap_or("")),
                    )
                })
                .collect();
            Ok(lines.join("\n"))
        }
        Command::Stats => {
            let mut stock = 0;
            for period in Period::all() {
                stock += state.keys.count(period)?;
            }
            let conn = state.db.get()?;
            Ok(format!(
                "<b>Stats</b>\nOrders: {}\nPaid: {}\nPending: {}\nRevenue: {}\nKeys in stock: {}",
                queries::count_orders(&conn, OrderFilter::All)?,
                queries::count_orders(&conn, OrderFilter::Paid)?,
                queries::count_orders(&conn, OrderFilter::Pending)?,
                queries::total_revenue(&conn)?,
                stock
            ))
        }

        Command::Broadcast(Some(text)) => send_broadcast(console, &text).await,
        Command::Broadcast(None) => {
            console.conversations().set(chat_id, Pending::BroadcastText);
            Ok("Send the message to broadcast. /cancel to stop.".to_string())
        }

        Command::Sync => {
            let mirror = state
                .mirror
                .as_ref()
                .ok_or_else(|| AppError::BadRequest("Remote mirror is not configured".into()))?;
            let files = mirror.pull_all(&state.keys).await?;
            if files.is_empty() {
                return Ok("Nothing to sync.".to_string());
            }
            let lines: Vec<String> = files
                .iter()
                .map(|f| format!("{}: {} lines", escape_html(&f.file), f.lines))
                .collect();
            Ok(format!("Synced from mirror:\n{}", lines.join("\n")))
        }

        Command::Cancel => match console.conversations().take(chat_id) {
            Some(_) => Ok("Cancelled.".to_string()),
            None => Ok("Nothing to cancel.".to_string()),
        },

        Command::Usage(usage) => Ok(format!("Usage: {}", escape_html(usage))),
        Command::Unknown(name) => Ok(format!(
            "Unknown command /{}. Send /help for the command list.",
            escape_html(&name)
        )),
    }
}

/// Handle the follow-up message of a multi-step command.
pub(super) async fn resume(console: &BotConsole, pending: Pending, text: &str) -> Result<String> {
    match pending {
        Pending::Keys(period) => {
            let keys: Vec<&str> = text
                .lines()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .collect();
            add_keys(console, period, &keys).await
        }
        Pending::BroadcastText => send_broadcast(console, text.trim()).await,
    }
}

async fn add_keys<S: AsRef<str>>(console: &BotConsole, period: Period, keys: &[S]) -> Result<String> {
    let state = console.state();
    let added = state.keys.add_keys(period, keys)?;
    let total = state.keys.count(period)?;
    tracing::info!(period = %period, added, total, "Keys added from bot");
    if added > 0 {
        state.mirror_pool(period).await;
    }
    Ok(format!(
        "Added {} of {} keys to {}. Now {} in stock.",
        added,
        keys.len(),
        period.display_label(),
        total
    ))
}

async fn send_broadcast(console: &BotConsole, text: &str) -> Result<String> {
    if text.is_empty() {
        return Err(AppError::BadRequest("Message must not be empty".into()));
    }
    let (sent, failed) = broadcast(console.state(), text).await?;
    tracing::info!(sent, failed, "Broadcast sent from bot");
    Ok(format!("Broadcast sent: {} delivered, {} failed.", sent, failed))
}

fn parse_coupon_args(args: &[String]) -> Result<CreateCoupon> {
    let discount: i64 = args[1]
        .trim_end_matches('%')
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid discount '{}'", args[1])))?;

    let (unlimited, uses_left) = if args[2].eq_ignore_ascii_case("unlimited") {
        (true, None)
    } else {
        let uses: i64 = args[2]
            .parse()
            .map_err(|_| AppError::BadRequest(format!("Invalid uses '{}'", args[2])))?;
        (false, Some(uses))
    };

    let expires_at = args
        .get(3)
        .filter(|s| s.as_str() != "-")
        .cloned();
    let types = args
        .get(4)
        .map(|s| {
            s.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(CreateCoupon {
        code: args[0].clone(),
        discount,
        unlimited,
        uses_left,
        expires_at,
        types,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text_is_not_a_command() {
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("/keys@shop_bot"), Some(Command::Keys(None)));
    }

    #[test]
    fn test_parse_addkey_collects_following_lines() {
        let command = Command::parse("/addkey 30d\nAAA-1\n\n BBB-2 \n").unwrap();
        assert_eq!(
            command,
            Command::AddKey {
                period: "30d".into(),
                keys: vec!["AAA-1".into(), "BBB-2".into()],
            }
        );
        assert_eq!(
            Command::parse("/addkey 7d").unwrap(),
            Command::AddKey {
                period: "7d".into(),
                keys: vec![],
            }
        );
        assert!(matches!(Command::parse("/addkey"), Some(Command::Usage(_))));
    }

    #[test]
    fn test_parse_broadcast_keeps_newlines() {
        assert_eq!(
            Command::parse("/broadcast Sale today!\nAll keys -20%").unwrap(),
            Command::Broadcast(Some("Sale today!\nAll keys -20%".into()))
        );
        assert_eq!(Command::parse("/broadcast").unwrap(), Command::Broadcast(None));
    }

    #[test]
    fn test_parse_setprice_label() {
        assert_eq!(
            Command::parse("/setprice 90d 550000 Quarter pass").unwrap(),
            Command::SetPrice {
                period: "90d".into(),
                amount: "550000".into(),
                label: Some("Quarter pass".into()),
            }
        );
    }

    #[test]
    fn test_coupon_args() {
        let args: Vec<String> = ["vip", "15%", "unlimited", "-", "30d,90d"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let input = parse_coupon_args(&args).unwrap();
        assert_eq!(input.discount, 15);
        assert!(input.unlimited);
        assert_eq!(input.expires_at, None);
        assert_eq!(input.types, vec!["30d".to_string(), "90d".to_string()]);

        let args: Vec<String> = ["SAVE10", "10", "3", "2030-01-01"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let input = parse_coupon_args(&args).unwrap();
        assert_eq!(input.uses_left, Some(3));
        assert_eq!(input.expires_at.as_deref(), Some("2030-01-01"));
        assert!(input.types.is_empty());
    }
}
