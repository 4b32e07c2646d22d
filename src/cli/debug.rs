//! 调试命令输出

use std::fmt::Write as _;

use crate::routing::RouteTable;

/// 路由表（按注册顺序）
pub fn format_routes(table: &RouteTable) -> String {
    let entries = table.entries();
    if entries.is_empty() {
        return "没有已注册的路由".to_string();
    }

    let name_width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0).max(4);
    let method_width = entries
        .iter()
        .map(|e| e.methods.join("|").len())
        .max()
        .unwrap_or(0)
        .max(6);
    let path_width = entries.iter().map(|e| e.path.len()).max().unwrap_or(0).max(4);

    let mut out = format!(
        "{:<nw$}  {:<mw$}  {:<pw$}  CONTROLLER\n",
        "NAME",
        "METHOD",
        "PATH",
        nw = name_width,
        mw = method_width,
        pw = path_width
    );
    for entry in entries {
        let _ = writeln!(
            out,
            "{:<nw$}  {:<mw$}  {:<pw$}  {}",
            entry.name,
            entry.methods.join("|"),
            entry.path,
            entry.controller,
            nw = name_width,
            mw = method_width,
            pw = path_width
        );
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouteEntry;

    #[test]
    fn test_format_routes() {
        assert_eq!(format_routes(&RouteTable::default()), "没有已注册的路由");

        let table = RouteTable::new(vec![
            RouteEntry {
                name: "game_index".into(),
                path: "/games".into(),
                methods: vec!["GET".into()],
                controller: "GameController".into(),
            },
            RouteEntry {
                name: "game_update".into(),
                path: "/games/{id}".into(),
                methods: vec!["PUT".into(), "PATCH".into()],
                controller: "GameController".into(),
            },
        ])
        .unwrap();
        let out = format_routes(&table);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("NAME         METHOD     PATH         CONTROLLER"));
        assert_eq!(lines[2], "game_update  PUT|PATCH  /games/{id}  GameController");
    }
}
