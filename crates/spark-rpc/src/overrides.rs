//! 覆盖串小语法，供类名黑白名单与过滤器选择共用。
//!
//! - 以 `,` 或 `;` 分隔，忽略首尾空白与空 token；
//! - `-X` / `!X` 删除 `X`；
//! - `-*`、`!*`、`-default`、`!default` 清空整个列表；
//! - 其余 token `X` 若不存在则追加，追加统一在全部 token 扫描完之后执行。

/// 对 `list` 应用覆盖串，就地修改。
pub fn apply_override(list: &mut Vec<String>, overrides: &str) {
    let mut additions: Vec<&str> = Vec::new();
    for token in tokens(overrides) {
        match removal_target(token) {
            Some("*" | "default") => list.clear(),
            Some(target) => list.retain(|entry| entry != target),
            None => {
                if !additions.contains(&token) {
                    additions.push(token);
                }
            }
        }
    }
    for token in additions {
        if !list.iter().any(|entry| entry == token) {
            list.push(token.to_owned());
        }
    }
}

/// 应用一串可选覆盖，`None` 与空串均视为不修改。
pub fn apply_overrides<'a>(list: &mut Vec<String>, overrides: impl IntoIterator<Item = &'a str>) {
    for value in overrides {
        apply_override(list, value);
    }
}

/// 按行解析名单资源：忽略空行与 `#` 注释。
pub fn parse_list(source: &str) -> Vec<String> {
    let mut list = Vec::new();
    for line in source.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !list.iter().any(|entry| entry == line) {
            list.push(line.to_owned());
        }
    }
    list
}

fn tokens(overrides: &str) -> impl Iterator<Item = &str> {
    overrides
        .split([',', ';'])
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn removal_target(token: &str) -> Option<&str> {
    token
        .strip_prefix('-')
        .or_else(|| token.strip_prefix('!'))
        .map(str::trim)
}
