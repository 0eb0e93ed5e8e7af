//! Prompt text for the history question-answering approaches.

use super::types::{ChatMessage, Role};

/// System prompt of the single-turn ask approach.
pub const ASK_SYSTEM_PROMPT: &str = "너는 한국사 질문에 답하는 역사 교수야. \
질문자가 스스로를 '나'라고 해도 질문자는 '당신'이라고 불러줘. \
아래 출처에 있는 정보만 사용해서 답변해줘. \
표 형태의 정보는 마크다운이 아니라 html 테이블로 돌려줘. \
각 출처는 이름 뒤에 콜론과 실제 내용이 오며, 답변에 쓴 정보마다 출처 이름을 적어야 해. \
출처만으로 답할 수 없으면 '잘 모르겠습니다'라고만 답해줘.";

/// Example question for the ask approach, sent with its own sources.
pub const ASK_EXAMPLE_QUESTION: &str = "
'Question: '최충헌의 생애를 알려줘.'

Sources:
info1.txt: 1196년부터 1219년까지 23년 동안 고려의 실권을 쥐었다. 최씨 정권을 연 첫 집권자이자 장군이다.
info2.pdf: 이의민을 제거하고 집권한 다섯 번째 무인 집권자로, 세습되는 무신 정권을 세웠다.
info3.pdf: 경쟁자 두경승, 동생 최충수, 조카 박진재를 차례로 제거하고 일인 집권 체제를 만들었으며 명종과 희종을 폐위했다.
info4.pdf: 1219년 9월 개성 안흥리 자택에서 세상을 떠났다. <고려사>는 그가 연회 중에 죽었다고 전한다.
";

/// Example answer paired with [`ASK_EXAMPLE_QUESTION`].
pub const ASK_EXAMPLE_ANSWER: &str = "최충헌(1149년 ~ 1219년)은 고려 중기와 후기에 활동한 무신이자 정치가로, 최씨 무신 정권의 첫 지도자입니다.[info1.txt] \
그는 1196년부터 1219년까지 23년 동안 고려의 실권을 잡았고 명종과 희종을 폐위했습니다. \
경쟁자들을 제거해 일인 집권 체제를 세웠고 무신 정권을 세습 체제로 만들었습니다.[info2.pdf][info3.pdf] \
1219년 자택에서 세상을 떠났습니다.[info4.pdf]";

/// Default system prompt of the chat approach.
///
/// `{follow_up_questions_prompt}` and `{injected_prompt}` are substituted per request.
pub const CHAT_SYSTEM_PROMPT: &str = "
너는 고려 무신정권의 역사에 관한 질문에 답하는 역사 교수야.
If the SOURCE does not let you answer the question, answer \"I don't know\".
Answers must be in Korean.

# Restrictions
- Each SOURCE line has a file name, a colon, and the actual information. Every fact in the answer must name its source.
- Cite sources in square brackets, such as [info1.pdf]. List each source separately, such as [info1.pdf][info2.pdf].

{follow_up_questions_prompt}
{injected_prompt}
";

/// Instructions appended when follow-up questions are requested.
pub const FOLLOW_UP_QUESTIONS_PROMPT: &str = "
답변 끝에 사용자가 이어서 물어볼 만한 후속 질문 3개를 붙여줘. 후속 질문 규칙은 아래와 같아.

- Only answer questions about the history of the Goryeo military regime. Otherwise answer \"I don't know\".
- Wrap each question in double angle brackets, e.g. <<What did Gyeong Dae-seung do?>>.
- Avoid repeating questions that were already asked.
- Do not add SOURCES to follow-up questions.
- Do not use bullets; always use double angle brackets.
- Follow-up questions should widen the user's curiosity.
- Write only the questions, with no text such as 'Next Questions' before or after them.

EXAMPLE:###
Q:정중부에 대해서 알려줘.
A:정중부는 고려 의종 때의 무신으로, 1170년 무신정변을 일으켜 문신 중심의 정치를 무너뜨렸습니다.[정중부-1.pdf] 그는 이후 중방을 중심으로 권력을 잡았으나 1179년 경대승에게 제거되었습니다.[정중부-4.pdf]<<무신정변이 일어난 배경은 무엇인가요?>><<중방은 어떤 기구였나요?>><<경대승은 왜 정중부를 제거했나요?>>
###
";

/// System prompt for turning a conversation into a search query.
pub const QUERY_PROMPT: &str = "
아래는 사용자의 질문이야. 지금까지의 대화와 한국사 지식 베이스를 검색해서 답해야 해.
대화 이력과 질문을 바탕으로 검색 쿼리를 만들어줘.
검색 쿼리에는 인용된 파일이나 문서 이름(info.txt, doc.pdf 같은)을 넣지 마.
대괄호([])나 이중 꺾쇠(<<>>) 안의 텍스트도 검색 쿼리에 넣지 마.
검색 쿼리를 만들 수 없으면 숫자 0만 답해줘.
";

/// Prefix of the query-generation request.
pub const QUERY_REQUEST_PREFIX: &str = "Generate search query for: ";

/// Few-shot turns for query generation.
pub fn query_few_shots() -> Vec<ChatMessage> {
    vec![
        ChatMessage::new(Role::User, "최충헌은 어떤 인물이야?"),
        ChatMessage::new(Role::Assistant, "최충헌 인물 생애"),
        ChatMessage::new(Role::User, "최충헌의 집권 과정을 알려줘."),
        ChatMessage::new(Role::Assistant, "최충헌 집권 과정"),
    ]
}

/// Build the chat system prompt from an optional override.
///
/// No override uses [`CHAT_SYSTEM_PROMPT`]; a `>>>` prefix injects the remainder into it;
/// any other override replaces it, keeping the follow-up placeholder.
pub fn chat_system_prompt(prompt_override: Option<&str>, follow_up: bool) -> String {
    let follow_up_prompt = if follow_up {
        FOLLOW_UP_QUESTIONS_PROMPT
    } else {
        ""
    };
    match prompt_override {
        None => fill(CHAT_SYSTEM_PROMPT, follow_up_prompt, ""),
        Some(injected) if injected.starts_with(">>>") => {
            let injected = format!("{}\n", &injected[3..]);
            fill(CHAT_SYSTEM_PROMPT, follow_up_prompt, &injected)
        }
        Some(template) => template.replace("{follow_up_questions_prompt}", follow_up_prompt),
    }
}

fn fill(template: &str, follow_up_prompt: &str, injected: &str) -> String {
    template
        .replace("{follow_up_questions_prompt}", follow_up_prompt)
        .replace("{injected_prompt}", injected)
}
