//! Prompt builders. Every prompt pins the entry point and return contract the
//! harness relies on.

use factorlab_core::{ExecutionResult, Variant};
use factorlab_executor::ENTRY_POINT;

/// Reader primitives the harness injects, as the model should see them.
const READERS_DOC: &str = r#"## 可用数据读取函数（执行环境已注入，直接调用，不要自行定义或覆盖）

1. read_trade(symbol: str, date: int, with_retreat: int = 0) -> pd.DataFrame
   逐笔成交。with_retreat=0 时排除撤单(flag=32)。
   字段: `exchtime`(pd.Timestamp), `price`, `volume`, `turnover`, `flag`(66=主买, 83=主卖, 32=撤单),
         `index`, `localtime`, `ask_order`, `bid_order`

2. read_market(symbol: str, date: int) -> pd.DataFrame
   盘口快照。
   字段: `symbol`, `exchtime`, `last_prc`, `prev_close`, `open`, `high`, `low`, `high_limited`,
         `low_limited`, `volume`, `turnover`, `num_trades`, `ask_prc1-10`, `ask_vol1-10`,
         `bid_prc1-10`, `bid_vol1-10`, `weighted_ask_prc`, `weighted_bid_prc`

3. read_market_pair(symbol: str, date: int) -> tuple[pd.DataFrame, pd.DataFrame]
   将10档买卖盘转为长格式，返回 (asks, bids)，列为 `exchtime`, `number`(档位), `price`, `vol`。

参数约定: symbol 为6位字符串（如 '000001'），date 为8位整数（如 20220819）。"#;

fn return_contract() -> String {
    format!(
        r#"1. **函数定义必须是 def {ep}(code, date):，绝对不要使用其他函数名**
2. **函数必须返回一个元组 tuple: (factor_dict, key_variables_dict)**
   - factor_dict: {{因子名: 因子值}}，因子值可以是标量(float/int)、时间序列(pd.Series)、数组或字典
   - key_variables_dict: {{变量名: 变量值}}，用于展示中间计算过程，优先返回带时间索引的 pd.Series"#,
        ep = ENTRY_POINT
    )
}

fn current_code_block(code: &str) -> String {
    if code.trim().is_empty() {
        return String::new();
    }
    format!("\n当前代码（供参考，不需要完全遵循）：\n```python\n{}\n```\n", code)
}

fn error_block(result: &ExecutionResult) -> String {
    format!(
        "执行错误信息：\n{}\n\n错误详情：\n{}",
        result.error_message(),
        result.traceback.as_deref().unwrap_or("无详细错误堆栈")
    )
}

/// Ask for `count` alternative implementations as a `{"variants": [...]}` object.
pub fn exploration_prompt(content: &str, regenerate: bool, count: usize) -> String {
    let diversity = if regenerate {
        "\n重要提示：这是重新生成请求，请提供与之前不同的、更具创新性的实现方案。尝试从不同角度理解因子描述，\
使用不同的数学方法或统计技术，或考虑不同的市场微观结构特征。\n"
    } else {
        ""
    };

    format!(
        r#"你是一位专业的量化研究员。请根据以下因子构造描述，生成{count}种不同的Python代码实现方案。

因子描述：
{content}

**你必须实现完整的因子计算逻辑，不能留空或只写TODO注释，代码必须能实际运行并返回有意义的结果。**
{diversity}
要求：
{contract}
3. 每种方案应是对因子描述的不同理解或不同实现角度
4. 代码中为关键中间变量加注释，保持简洁高效
5. 如果某个因子本身包含多个子指标，可以把整个字典作为单个因子值返回

{readers}

## 伪代码格式
使用【数据读取阶段】【数据预处理阶段】【因子计算阶段】【结果输出阶段】等标注划分阶段；
每个步骤写明序号、使用的字段（用反引号标注并注明来源）、计算公式和中间变量名。

请只返回合法 JSON（不要包含 markdown 代码块标记），pseudocode 与 code 中的换行使用 \n 转义：
{{
  "variants": [
    {{
      "name": "方案名称",
      "description": "方案描述",
      "pseudocode": "【数据读取阶段】\n1. 读取逐笔成交数据 ...",
      "code": "import pandas as pd\ndef {ep}(code, date):\n    ..."
    }}
  ]
}}"#,
        count = count,
        content = content,
        diversity = diversity,
        contract = return_contract(),
        readers = READERS_DOC,
        ep = ENTRY_POINT,
    )
}

/// Repair prompt for one failing variant inside the validation loop.
pub fn fix_prompt(description: &str, variant: &Variant, result: &ExecutionResult) -> String {
    format!(
        r#"你是一位专业的量化研究员。之前生成的代码执行出错，请修复它。

原始因子描述：
{description}

方案名称：{name}
方案描述：{vdesc}

当前代码：
```python
{code}
```

{error}

{readers}

## 修复要求
{contract}
3. 保持原有的因子计算逻辑和思路，只修复导致错误的部分
4. 可以使用 numpy、pandas、scipy 等常用库

请返回修复后的完整 Python 代码："#,
        description = description,
        name = variant.name,
        vdesc = variant.description,
        code = variant.code,
        error = error_block(result),
        readers = READERS_DOC,
        contract = return_contract(),
    )
}

/// Code from a description and pseudocode. With `pseudocode_diff` the model
/// is asked for an incremental edit of `current_code` instead of a rewrite.
pub fn code_from_description_prompt(
    description: &str,
    pseudocode: &str,
    current_code: &str,
    pseudocode_diff: Option<&str>,
) -> String {
    match pseudocode_diff {
        Some(diff) => format!(
            r#"你是一位专业的量化研究员。用户修改了伪代码，请对当前代码做对应的精准修改。

**伪代码变更（+ 表示新增，- 表示删除）：**
```
{diff}
```

**当前伪代码（修改后）：**
```
{pseudocode}
```

**方案说明：**
{description}
{current}
## 修改要求
这是增量修改任务，不是重写：只修改与伪代码变更相关的代码，未变更的部分保持原样。
对新增(+)的行补充实现，对删除(-)的行移除对应逻辑。
{contract}
3. 代码必须完整可执行，包含所有必要的 import，并处理空数据

{readers}

请只返回完整的 Python 代码："#,
            diff = diff,
            pseudocode = pseudocode,
            description = description,
            current = current_code_block(current_code),
            contract = return_contract(),
            readers = READERS_DOC,
        ),
        None => format!(
            r#"你是一位专业的量化研究员。请根据以下方案说明和伪代码，生成完整、可执行的 Python 代码。

方案说明：
{description}

计算流程伪代码：
```
{pseudocode}
```
{current}
要求：
{contract}
3. 代码必须完整可执行，包含所有必要的 import
4. 严格遵循伪代码描述的计算流程，并处理空数据

{readers}

请只返回完整的 Python 代码："#,
            description = description,
            pseudocode = pseudocode,
            current = current_code_block(current_code),
            contract = return_contract(),
            readers = READERS_DOC,
        ),
    }
}

/// Repair prompt for the code-from-description flow.
pub fn code_fix_prompt(description: &str, pseudocode: &str, code: &str, result: &ExecutionResult) -> String {
    format!(
        r#"生成的代码有错误，请修复它。

方案说明：
{description}

伪代码：
{pseudocode}

当前代码：
```python
{code}
```

{error}

请修复代码中的错误，确保代码能够成功执行，函数仍为 {ep}(code, date)。只返回修复后的完整代码："#,
        description = description,
        pseudocode = pseudocode,
        code = code,
        error = error_block(result),
        ep = ENTRY_POINT,
    )
}
