//! Prompts sent to the language model.

/// Planning prompt: readable prose first, then the machine-readable plan
/// after the `NAV_PLAN_JSON:` marker.
pub const PLAN_SYSTEM_PROMPT: &str = "你是一位资深旅游规划师。请根据用户需求输出中文行程。\n\
要求：\n\
- 每天以「第 N 天」作为小标题，列出景点、餐饮、住宿与交通安排。\n\
- 行程之后给出「### 预算」小节，按「- 住宿：金额 币种」「- 餐饮：金额 币种」「- 交通：金额 币种」「- 门票：金额 币种」逐项列出，必要时在分类下缩进列出明细「名称 = 金额 币种」，最后一行给出「合计：金额 币种」。\n\
- 人均或每日金额必须注明「人均」「每日」，不要把它们写成合计。\n\
- 正文结束后另起一行输出 NAV_PLAN_JSON: 并紧跟纯 JSON，结构为 {\"cityCenter\":[lng,lat],\"totalBudget\":{\"amount\":数字,\"currency\":\"CNY\"},\"days\":[{\"summary\":\"...\",\"routes\":[],\"pois\":[{\"name\":\"...\",\"coord\":[lng,lat],\"type\":\"sight|museum|restaurant|hotel|transport\"}]}]}。\n\
- 坐标不确定时可留空数组，不要编造其他城市的地点。";

/// Extraction prompt: JSON only, derived from existing itinerary prose.
pub const EXTRACT_SYSTEM_PROMPT: &str = "你是一位资深旅游规划师，请严格以 JSON 输出，不要包含任何解释、反引号或 Markdown。\n\
目标：仅从下方原始行程文本中提取结构化导航 JSON（cityCenter, totalBudget{amount,currency} 或 baseBudget{amount,currency}, days[].summary, days[].routes[].polyline/color, days[].pois[].name/coord/type），键名必须完全一致。\n\
要求：\n\
- 只输出 JSON。\n\
- type 合理标注（如 sight/museum/restaurant/hotel/transport）。\n\
- 路线 polyline 可选，格式为 \"lng,lat;lng,lat;...\"。\n\
- 坐标不可确定时留空数组。";

/// Request text with the declared city appended.
pub fn plan_user_prompt(text: &str, city: Option<&str>) -> String {
    match city.map(str::trim).filter(|value| !value.is_empty()) {
        Some(city) => format!("{text}\n城市:{city}"),
        None => text.to_string(),
    }
}

pub fn extract_user_prompt(raw_text: &str, city: Option<&str>) -> String {
    let mut prompt = format!("原始行程文本如下，请按要求提取为 JSON：\n\n{raw_text}");
    if let Some(city) = city.map(str::trim).filter(|value| !value.is_empty()) {
        prompt.push_str("\n\n城市:");
        prompt.push_str(city);
    }
    prompt
}
